//! The reader thread: routes every line the device sends.

use std::io::Read;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::Sender;
use goat_metrics::metric_defs;
use tracing::{debug, trace};

use crate::codec::LineReader;
use crate::dispatch::{PendingIndication, UnsolicitedNotification};
use crate::engine::{Phase, Shared};
use crate::error::AtError;
use crate::response::terminal_status;

pub(crate) struct Router {
    shared: Arc<Shared>,
    /// Lines for the in-flight command.
    tx: Sender<String>,
    pending: Option<PendingIndication>,
}

impl Router {
    pub(crate) fn new(shared: Arc<Shared>, tx: Sender<String>) -> Self {
        Router {
            shared,
            tx,
            pending: None,
        }
    }

    /// Read until the transport closes or the engine is dropped.
    pub(crate) fn run<R: Read>(mut self, mut reader: LineReader<R>) {
        let name = self.shared.config.name.clone();
        let poll = self.shared.config.poll_interval();
        debug!("Engine[{}]: reader started", name);

        loop {
            if self.shared.shutdown.load(Ordering::Acquire) {
                debug!("Engine[{}]: reader shutting down", name);
                break;
            }

            match reader.next_line(Instant::now() + poll) {
                Ok(line) => {
                    trace!("Engine[{}]: <- '{}'", name, line);
                    self.route(line);
                }
                Err(AtError::Timeout) => {}
                Err(e) => {
                    debug!("Engine[{}]: reader stopped: {}", name, e);
                    break;
                }
            }
        }

        if let Some(pending) = self.pending.take() {
            self.shared.dispatcher.publish(pending.into_notification());
        }
        self.shared.close();
        // Dropping `tx` wakes a caller still waiting for lines.
    }

    fn route(&mut self, line: String) {
        if let Some(pending) = self.pending.take() {
            match pending.push(line) {
                Ok(notification) => self.shared.dispatcher.publish(notification),
                Err(pending) => self.pending = Some(pending),
            }
            return;
        }

        let dispatcher = &self.shared.dispatcher;
        let mut exchange = self.shared.exchange.lock();

        if let Some(indication) = dispatcher.match_indication(&line, exchange.command.as_deref()) {
            drop(exchange);
            match dispatcher.begin_indication(&indication, line) {
                Ok(notification) => dispatcher.publish(notification),
                Err(pending) => self.pending = Some(pending),
            }
            return;
        }

        let phase = exchange.phase;
        match phase {
            Phase::Idle => dispatcher.publish(UnsolicitedNotification::new(line)),
            Phase::Draining { .. } => drain_line(&self.shared, &mut exchange.phase, line),
            Phase::Sending | Phase::AwaitingEcho | Phase::AwaitingBody => {
                // The receiver lives as long as the engine's shared state.
                let _ = self.tx.send(line);
            }
        }
    }
}

/// Handle one line of an abandoned exchange.
///
/// Lines are discarded until a final result code, `drain_max_lines` lines, or
/// the end of the grace window. A line arriving after the window is no longer
/// stale and goes to the dispatcher.
pub(crate) fn drain_line(shared: &Shared, phase: &mut Phase, line: String) {
    let Phase::Draining { until, remaining } = *phase else {
        return;
    };
    let name = &shared.config.name;

    if Instant::now() >= until {
        debug!("Engine[{}]: drain window over", name);
        *phase = Phase::Idle;
        shared.idle.notify_all();
        shared.dispatcher.publish(UnsolicitedNotification::new(line));
        return;
    }

    metrics::counter!(metric_defs::AT_DRAINED_LINES.name, &shared.labels.to_labels())
        .increment(1);

    if terminal_status(&line).is_some() {
        debug!("Engine[{}]: stale exchange ended with '{}'", name, line);
        *phase = Phase::Idle;
        shared.idle.notify_all();
        return;
    }

    debug!("Engine[{}]: discarding stale '{}'", name, line);
    let remaining = remaining.saturating_sub(1);
    if remaining == 0 {
        *phase = Phase::Idle;
        shared.idle.notify_all();
    } else {
        *phase = Phase::Draining { until, remaining };
    }
}
