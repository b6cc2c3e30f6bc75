//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Line ending appended to every command frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineEnding {
    /// `\r`, the V.250 default for S3.
    Cr,
    /// `\r\n`.
    #[default]
    CrLf,
}

impl LineEnding {
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            LineEnding::Cr => b"\r",
            LineEnding::CrLf => b"\r\n",
        }
    }
}

/// An unsolicited result code registered at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicationConfig {
    /// Line prefix, e.g. `+CMTI:`.
    pub prefix: String,
    /// Number of lines following the indication that belong to it.
    #[serde(default)]
    pub trailing_lines: usize,
}

/// Configuration for an [`Engine`](crate::Engine).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Device name, used in logs and as the `device` metric label.
    pub name: String,
    /// Command terminator.
    pub line_ending: LineEnding,
    /// Body of the Init probe command (`AT` + probe).
    pub probe: String,
    /// Send ESC + line ending before the probe to abort a pending data prompt.
    pub escape_on_init: bool,
    /// How long to wait for the reply to the escape sequence.
    pub escape_grace_ms: u64,
    /// How long stale lines of an abandoned exchange are discarded.
    pub drain_grace_ms: u64,
    /// Maximum number of stale lines discarded before giving up.
    pub drain_max_lines: usize,
    /// Read timeout of the reader thread; bounds shutdown latency.
    pub poll_interval_ms: u64,
    /// Pending bytes without a terminator are surfaced as a line beyond this.
    pub max_line_length: usize,
    /// Queue depth per subscriber before notifications are dropped.
    pub subscriber_capacity: usize,
    /// Commands run at the end of Init, in order.
    pub init_commands: Vec<String>,
    /// Indications registered when the engine starts.
    pub indications: Vec<IndicationConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            name: "modem".to_string(),
            line_ending: LineEnding::CrLf,
            probe: String::new(),
            escape_on_init: false,
            escape_grace_ms: 50,
            drain_grace_ms: 500,
            drain_max_lines: 32,
            poll_interval_ms: 50,
            max_line_length: 4096,
            subscriber_capacity: 64,
            init_commands: Vec::new(),
            indications: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn escape_grace(&self) -> Duration {
        Duration::from_millis(self.escape_grace_ms)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        // A zero read timeout means "block forever" on most transports.
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}
