//! Trace sinks.

use std::fmt::Write as _;
use std::io::Write;

use chrono::{SecondsFormat, Utc};
use goat_metrics::{metric_defs, DeviceLabels};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::trace::{Direction, TraceSink};

/// Render bytes for a log line: printable ASCII as is, everything else escaped.
///
/// ```
/// assert_eq!(goat_trace::escape(b"AT\r\n"), "AT\\r\\n");
/// assert_eq!(goat_trace::escape(b"hi\x1a"), "hi\\x1a");
/// ```
pub fn escape(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len());
    for &b in data {
        match b {
            b'\r' => out.push_str("\\r"),
            b'\n' => out.push_str("\\n"),
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7e => out.push(b as char),
            _ => {
                let _ = write!(out, "\\x{:02x}", b);
            }
        }
    }
    out
}

/// Emits traffic as `tracing` events on the `goat_trace` target and counts
/// bytes per direction.
#[derive(Debug, Clone)]
pub struct TracingSink {
    labels: DeviceLabels,
}

impl TracingSink {
    pub fn new(device: impl Into<String>) -> Self {
        TracingSink {
            labels: DeviceLabels::new(device),
        }
    }
}

impl TraceSink for TracingSink {
    fn record(&self, direction: Direction, data: &[u8]) {
        debug!(
            target: "goat_trace",
            device = %self.labels.device,
            "{}: {}",
            direction.prefix(),
            escape(data)
        );
        metrics::counter!(
            metric_defs::TRACE_BYTES.name,
            &self
                .labels
                .with(&[("direction", direction.as_str().to_string())])
        )
        .increment(data.len() as u64);
    }
}

/// Writes one line per chunk, e.g. `2026-10-19T08:00:00.123Z w: AT+CSQ\r\n`.
pub struct LineSink<W> {
    out: Mutex<W>,
    timestamps: bool,
}

impl<W: Write + Send> LineSink<W> {
    pub fn new(out: W) -> Self {
        LineSink {
            out: Mutex::new(out),
            timestamps: true,
        }
    }

    /// Omit the leading timestamp.
    pub fn without_timestamps(mut self) -> Self {
        self.timestamps = false;
        self
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }

    fn format(&self, direction: Direction, data: &[u8]) -> String {
        if self.timestamps {
            format!(
                "{} {}: {}",
                Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                direction.prefix(),
                escape(data)
            )
        } else {
            format!("{}: {}", direction.prefix(), escape(data))
        }
    }
}

impl<W: Write + Send> TraceSink for LineSink<W> {
    fn record(&self, direction: Direction, data: &[u8]) {
        let line = self.format(direction, data);
        let mut out = self.out.lock();
        if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
            warn!("trace output failed: {}", e);
        }
    }
}
