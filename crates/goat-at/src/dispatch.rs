//! Unsolicited line dispatch.
//!
//! Lines that belong to no command (anything arriving while the engine is
//! idle, trailing lines after a final result code, and registered indications
//! at any time) are broadcast to every subscriber. Each subscriber gets a
//! bounded queue; when it is full the notification is dropped for that
//! subscriber only.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use goat_metrics::{metric_defs, DeviceLabels};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, trace};

use crate::error::{AtError, AtResult};

/// A line (or indication) the device sent outside any command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnsolicitedNotification {
    /// The line as received, terminator stripped.
    pub text: String,
    /// Lines following a registered indication that belong to it.
    pub trailing: Vec<String>,
    /// When the line was read.
    pub observed_at: DateTime<Utc>,
}

impl UnsolicitedNotification {
    pub fn new(text: impl Into<String>) -> Self {
        UnsolicitedNotification {
            text: text.into(),
            trailing: Vec::new(),
            observed_at: Utc::now(),
        }
    }
}

/// A stream of unsolicited notifications.
///
/// Iterating blocks until the next notification; the iterator ends when the
/// engine's transport closes or the engine is dropped. Dropping the
/// subscription unregisters it.
#[derive(Debug)]
pub struct Subscription {
    rx: Receiver<UnsolicitedNotification>,
}

impl Subscription {
    /// Block until the next notification. `None` once the stream has ended.
    pub fn recv(&self) -> Option<UnsolicitedNotification> {
        self.rx.recv().ok()
    }

    /// Wait up to `timeout` for the next notification.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<UnsolicitedNotification> {
        self.recv_deadline(Instant::now() + timeout)
    }

    /// Wait until `deadline` for the next notification.
    pub fn recv_deadline(&self, deadline: Instant) -> Option<UnsolicitedNotification> {
        match self.rx.recv_deadline(deadline) {
            Ok(n) => Some(n),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Take a queued notification without blocking.
    pub fn try_recv(&self) -> Option<UnsolicitedNotification> {
        match self.rx.try_recv() {
            Ok(n) => Some(n),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

impl Iterator for Subscription {
    type Item = UnsolicitedNotification;

    fn next(&mut self) -> Option<UnsolicitedNotification> {
        self.recv()
    }
}

/// A registered unsolicited result code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Indication {
    pub prefix: String,
    pub trailing_lines: usize,
}

impl Indication {
    /// Command name the prefix answers to, e.g. `+CREG` for `+CREG:`.
    fn name(&self) -> &str {
        self.prefix.trim_end().trim_end_matches(':')
    }
}

/// An indication waiting for its trailing lines.
#[derive(Debug)]
pub(crate) struct PendingIndication {
    notification: UnsolicitedNotification,
    remaining: usize,
}

impl PendingIndication {
    /// Attach a trailing line; returns the notification once complete.
    pub(crate) fn push(mut self, line: String) -> Result<UnsolicitedNotification, Self> {
        self.notification.trailing.push(line);
        self.remaining -= 1;
        if self.remaining == 0 {
            Ok(self.notification)
        } else {
            Err(self)
        }
    }

    /// Give up waiting for trailing lines.
    pub(crate) fn into_notification(self) -> UnsolicitedNotification {
        self.notification
    }
}

/// Fan-out of unsolicited lines to subscribers.
#[derive(Debug)]
pub struct Dispatcher {
    /// `None` once closed.
    subscribers: Mutex<Option<Vec<Sender<UnsolicitedNotification>>>>,
    indications: Mutex<Vec<Indication>>,
    capacity: usize,
    labels: DeviceLabels,
}

impl Dispatcher {
    pub fn new(capacity: usize, device: &str) -> Self {
        Dispatcher {
            subscribers: Mutex::new(Some(Vec::new())),
            indications: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
            labels: DeviceLabels::new(device),
        }
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = crossbeam_channel::bounded(self.capacity);
        if let Some(subscribers) = self.subscribers.lock().as_mut() {
            subscribers.push(tx);
            self.record_subscribers(subscribers.len());
        }
        Subscription { rx }
    }

    /// Deliver a notification to every live subscriber.
    pub fn publish(&self, notification: UnsolicitedNotification) {
        trace!("unsolicited: {}", notification.text);
        metrics::counter!(metric_defs::AT_UNSOLICITED.name, &self.labels.to_labels()).increment(1);

        let mut guard = self.subscribers.lock();
        let Some(subscribers) = guard.as_mut() else {
            return;
        };
        subscribers.retain(|tx| match tx.try_send(notification.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("subscriber queue full, dropping notification");
                metrics::counter!(
                    metric_defs::AT_DROPPED_NOTIFICATIONS.name,
                    &self.labels.to_labels()
                )
                .increment(1);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
        self.record_subscribers(subscribers.len());
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().as_ref().map_or(0, |s| s.len())
    }

    /// End every subscription; later subscriptions end immediately.
    pub fn close(&self) {
        self.subscribers.lock().take();
        self.record_subscribers(0);
    }

    fn record_subscribers(&self, count: usize) {
        metrics::gauge!(metric_defs::AT_SUBSCRIBERS.name, &self.labels.to_labels())
            .set(count as f64);
    }

    pub fn add_indication(&self, prefix: &str, trailing_lines: usize) -> AtResult<()> {
        let mut indications = self.indications.lock();
        if indications.iter().any(|i| i.prefix == prefix) {
            return Err(AtError::IndicationExists(prefix.to_string()));
        }
        indications.push(Indication {
            prefix: prefix.to_string(),
            trailing_lines,
        });
        Ok(())
    }

    /// Returns whether the prefix was registered.
    pub fn remove_indication(&self, prefix: &str) -> bool {
        let mut indications = self.indications.lock();
        let before = indications.len();
        indications.retain(|i| i.prefix != prefix);
        indications.len() != before
    }

    /// Match `line` against the registered indications.
    ///
    /// `command` is the name of the in-flight command, if any; a query's own
    /// response (`+CREG: ...` for `+CREG?`) is not an indication.
    pub(crate) fn match_indication(
        &self,
        line: &str,
        command: Option<&str>,
    ) -> Option<Indication> {
        let indications = self.indications.lock();
        let found = indications.iter().find(|i| line.starts_with(&i.prefix))?;
        if command.is_some_and(|name| name == found.name()) {
            return None;
        }
        Some(found.clone())
    }

    /// Start a notification for a matched indication.
    ///
    /// Returns the finished notification immediately when it has no trailing
    /// lines.
    pub(crate) fn begin_indication(
        &self,
        indication: &Indication,
        line: String,
    ) -> Result<UnsolicitedNotification, PendingIndication> {
        let notification = UnsolicitedNotification::new(line);
        if indication.trailing_lines == 0 {
            Ok(notification)
        } else {
            Err(PendingIndication {
                notification,
                remaining: indication.trailing_lines,
            })
        }
    }
}
