//! FIFO admission gate.
//!
//! A ticket lock: each caller draws a ticket on arrival and is admitted when
//! the serving counter reaches it, so waiters are released strictly in arrival
//! order. A caller whose deadline passes while queued abandons its ticket and
//! the releasing holder skips over it.

use std::collections::BTreeSet;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct Tickets {
    next: u64,
    serving: u64,
    abandoned: BTreeSet<u64>,
}

/// Mutual-exclusion gate with FIFO hand-off and deadlines.
#[derive(Debug, Default)]
pub struct Gate {
    tickets: Mutex<Tickets>,
    turn: Condvar,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for our turn, giving up at `deadline`.
    pub fn acquire(&self, deadline: Instant) -> Option<GateGuard<'_>> {
        let mut tickets = self.tickets.lock();
        let ticket = tickets.next;
        tickets.next += 1;

        while tickets.serving != ticket {
            if self.turn.wait_until(&mut tickets, deadline).timed_out()
                && tickets.serving != ticket
            {
                tickets.abandoned.insert(ticket);
                return None;
            }
        }

        Some(GateGuard { gate: self })
    }

    /// Whether some caller currently holds the gate.
    pub fn is_held(&self) -> bool {
        let tickets = self.tickets.lock();
        tickets.serving != tickets.next
    }

    fn release(&self) {
        let mut tickets = self.tickets.lock();
        tickets.serving += 1;
        loop {
            let serving = tickets.serving;
            if !tickets.abandoned.remove(&serving) {
                break;
            }
            tickets.serving += 1;
        }
        self.turn.notify_all();
    }
}

/// Holds the gate until dropped.
#[derive(Debug)]
pub struct GateGuard<'a> {
    gate: &'a Gate,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}
