//! Metrics infrastructure for the goat modem tooling.
//!
//! This crate declares every metric recorded by the AT engine and the trace
//! decorator as structured [`Metric`] constants, and re-exports the `metrics`
//! facade so callers can record against whatever recorder the host installs.
//!
//! # Example
//!
//! ```rust,ignore
//! use goat_metrics::{metric_defs, describe_metrics, DeviceLabels};
//!
//! // Initialize metrics descriptions at startup
//! describe_metrics();
//!
//! let labels = DeviceLabels::new("ttyUSB0");
//! metrics::counter!(
//!     metric_defs::AT_COMMANDS.name,
//!     &labels.with(&[("outcome", "ok".to_string())])
//! )
//! .increment(1);
//! ```
//!
//! # Metric Type
//!
//! ```rust
//! use goat_metrics::{Metric, MetricKind};
//! use metrics::Unit;
//!
//! const MY_COUNTER: Metric = Metric::counter("my.counter")
//!     .with_description("A counter metric")
//!     .with_unit(Unit::Count)
//!     .with_labels(&["device"]);
//!
//! assert_eq!(MY_COUNTER.kind, MetricKind::Counter);
//! ```

pub use metrics;

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

/// The kind of metric (counter, gauge, or histogram).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// A monotonically increasing counter.
    Counter,
    /// A gauge that can go up and down.
    Gauge,
    /// A histogram for recording distributions.
    Histogram,
}

impl MetricKind {
    /// Returns the kind as a lowercase string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metric declaration with its metadata.
///
/// Use the const constructors to declare metrics at compile time.
///
/// ```rust
/// use goat_metrics::{Metric, MetricKind};
/// use metrics::Unit;
///
/// const LINES_READ: Metric = Metric::counter("goat.example.lines")
///     .with_description("Lines read from the device")
///     .with_unit(Unit::Count)
///     .with_labels(&["device"]);
///
/// assert_eq!(LINES_READ.name, "goat.example.lines");
/// ```
#[derive(Debug, Clone)]
pub struct Metric {
    /// The metric name (e.g., "goat.at.commands").
    pub name: &'static str,
    /// The kind of metric (counter, gauge, histogram).
    pub kind: MetricKind,
    /// Human-readable description of the metric.
    pub description: &'static str,
    /// The unit of measurement (optional).
    pub unit: Option<Unit>,
    /// Expected label keys for this metric.
    pub labels: &'static [&'static str],
}

impl Metric {
    /// Creates a new counter metric with the given name.
    pub const fn counter(name: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Counter,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    /// Creates a new gauge metric with the given name.
    pub const fn gauge(name: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Gauge,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    /// Creates a new histogram metric with the given name.
    pub const fn histogram(name: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Histogram,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    /// Sets the description for the metric.
    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    /// Sets the unit for the metric.
    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Sets the expected label keys for the metric.
    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Registers this metric's description with the metrics recorder.
    ///
    /// This should be called once at startup for each metric.
    pub fn describe(&self) {
        match (self.kind, self.unit) {
            (MetricKind::Counter, Some(unit)) => {
                describe_counter!(self.name, unit, self.description);
            }
            (MetricKind::Counter, None) => {
                describe_counter!(self.name, self.description);
            }
            (MetricKind::Gauge, Some(unit)) => {
                describe_gauge!(self.name, unit, self.description);
            }
            (MetricKind::Gauge, None) => {
                describe_gauge!(self.name, self.description);
            }
            (MetricKind::Histogram, Some(unit)) => {
                describe_histogram!(self.name, unit, self.description);
            }
            (MetricKind::Histogram, None) => {
                describe_histogram!(self.name, self.description);
            }
        }
    }
}

/// All metric definitions for the modem tooling.
pub mod metric_defs {
    use super::{Metric, Unit};

    /// Labels present on every engine metric.
    pub const DEVICE_LABELS: &[&str] = &["device"];

    // ========================================================================
    // AT Engine
    // ========================================================================

    /// Completed command exchanges, by outcome.
    ///
    /// Labels: device, outcome (ok, device_error, timeout, closed,
    /// prompt_missing, other)
    pub const AT_COMMANDS: Metric = Metric::counter("goat.at.commands")
        .with_description("Command exchanges completed, by outcome")
        .with_unit(Unit::Count)
        .with_labels(&["device", "outcome"]);

    /// Wall time from gate admission to the end of an exchange.
    ///
    /// Labels: device
    pub const AT_COMMAND_DURATION: Metric = Metric::histogram("goat.at.command_duration_seconds")
        .with_description("Duration of command exchanges")
        .with_unit(Unit::Seconds)
        .with_labels(DEVICE_LABELS);

    /// Lines routed to the unsolicited dispatcher.
    ///
    /// Labels: device
    pub const AT_UNSOLICITED: Metric = Metric::counter("goat.at.unsolicited")
        .with_description("Unsolicited lines delivered to the dispatcher")
        .with_unit(Unit::Count)
        .with_labels(DEVICE_LABELS);

    /// Stale lines discarded after an abandoned exchange.
    ///
    /// Labels: device
    pub const AT_DRAINED_LINES: Metric = Metric::counter("goat.at.drained_lines")
        .with_description("Stale response lines discarded after a timeout")
        .with_unit(Unit::Count)
        .with_labels(DEVICE_LABELS);

    /// Notifications dropped because a subscriber was not keeping up.
    ///
    /// Labels: device
    pub const AT_DROPPED_NOTIFICATIONS: Metric = Metric::counter("goat.at.dropped_notifications")
        .with_description("Notifications dropped for slow subscribers")
        .with_unit(Unit::Count)
        .with_labels(DEVICE_LABELS);

    /// Live subscriptions to unsolicited notifications.
    ///
    /// Labels: device
    pub const AT_SUBSCRIBERS: Metric = Metric::gauge("goat.at.subscribers")
        .with_description("Live unsolicited notification subscribers")
        .with_unit(Unit::Count)
        .with_labels(DEVICE_LABELS);

    // ========================================================================
    // Trace Decorator
    // ========================================================================

    /// Bytes observed by the trace decorator.
    ///
    /// Labels: device, direction (read, write)
    pub const TRACE_BYTES: Metric = Metric::counter("goat.trace.bytes")
        .with_description("Bytes passed through the trace decorator")
        .with_unit(Unit::Bytes)
        .with_labels(&["device", "direction"]);

    /// Returns a slice of all defined metrics.
    pub const ALL: &[&Metric] = &[
        &AT_COMMANDS,
        &AT_COMMAND_DURATION,
        &AT_UNSOLICITED,
        &AT_DRAINED_LINES,
        &AT_DROPPED_NOTIFICATIONS,
        &AT_SUBSCRIBERS,
        &TRACE_BYTES,
    ];
}

/// Labels identifying which device a metric belongs to.
///
/// ```rust
/// use goat_metrics::DeviceLabels;
///
/// let labels = DeviceLabels::new("ttyUSB0");
/// let extended = labels.with(&[("outcome", "ok".to_string())]);
/// assert!(extended.iter().any(|(k, v)| *k == "outcome" && v == "ok"));
/// ```
#[derive(Debug, Clone)]
pub struct DeviceLabels {
    /// Device name, as configured on the engine.
    pub device: String,
}

impl DeviceLabels {
    /// Creates labels for the named device.
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
        }
    }

    /// Converts the labels to the metrics crate label format.
    pub fn to_labels(&self) -> Vec<(&'static str, String)> {
        vec![("device", self.device.clone())]
    }

    /// Returns labels with additional key-value pairs.
    pub fn with(&self, extra: &[(&'static str, String)]) -> Vec<(&'static str, String)> {
        let mut labels = self.to_labels();
        labels.extend_from_slice(extra);
        labels
    }
}

/// Describes all metrics used by the modem tooling.
///
/// Call once at startup, after installing a recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}
