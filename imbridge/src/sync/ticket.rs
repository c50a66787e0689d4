//! Ticket-ordered wait queue.
//!
//! Serializes callers that contend for one shared resource (for example
//! "only one engine switch in flight"). Each caller pushes a [`Ticket`],
//! waits until its ticket is the head of the queue, does its work and pops.
//! Turn order is exactly push order.
//!
//! # Locking
//!
//! Two mutexes are used: `tickets` guards the container and `wait_lock`
//! guards the wait predicate. [`TicketQueue::is_ready`] only needs the
//! container lock, so it can be polled without touching waiters. `pop`
//! takes `wait_lock` before notifying, and waiters re-check readiness on
//! every wake, so a wake-up is at worst delayed until the waiter's own
//! timeout slice expires.
//!
//! # Starvation
//!
//! A ticket owner that never calls [`TicketQueue::pop`] blocks the head
//! forever. Later waiters each time out on their own; nothing here evicts a
//! stuck head.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use minstant::Instant;

use crate::sync::{Timeout, deadline_after};
use crate::trace::{debug, trace};

/// Shortest step [`TicketQueue::wait_turn`] sleeps for between readiness checks.
pub const MIN_WAIT_SLICE: Duration = Duration::from_millis(1);

/// One caller's claim on the shared resource.
///
/// Opaque; compare by equality only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(u64);

impl Ticket {
    /// Generates a new random ticket.
    #[must_use]
    pub fn generate() -> Self {
        Self(rand::random())
    }
}

impl From<u64> for Ticket {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// FIFO admission queue.
#[derive(Default)]
pub struct TicketQueue {
    tickets: Mutex<VecDeque<Ticket>>,
    wait_lock: Mutex<()>,
    turn: Condvar,
}

impl TicketQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn tickets(&self) -> MutexGuard<'_, VecDeque<Ticket>> {
        self.tickets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `ticket` to the tail. Must happen before any `wait` on it.
    pub fn push(&self, ticket: Ticket) {
        let depth = {
            let mut tickets = self.tickets();
            tickets.push_back(ticket);
            tickets.len()
        };
        trace!(%ticket, depth, "ticket pushed");
    }

    /// Removes the head and wakes every waiter.
    ///
    /// Returns the removed ticket, or `None` if the queue was empty.
    pub fn pop(&self) -> Option<Ticket> {
        let popped = self.tickets().pop_front();
        {
            let _wait = self.wait_lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.turn.notify_all();
        }
        if let Some(ticket) = popped {
            trace!(%ticket, "ticket popped");
        }
        popped
    }

    /// Returns `true` iff `ticket` is the current head.
    ///
    /// An empty queue has no head, so every ticket is reported not ready.
    #[must_use]
    pub fn is_ready(&self, ticket: Ticket) -> bool {
        self.tickets().front() == Some(&ticket)
    }

    /// Blocks until `ticket` is the head or `timeout` elapses.
    ///
    /// A timeout too large for the clock waits until the ticket is the head.
    ///
    /// Returns whether the ticket is the head when the call returns.
    pub fn wait(&self, ticket: Ticket, timeout: Duration) -> bool {
        if self.is_ready(ticket) {
            return true;
        }

        let deadline = deadline_after(timeout);
        let mut guard = self.wait_lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if self.is_ready(ticket) {
                return true;
            }
            let Some(deadline) = deadline else {
                guard = self.turn.wait(guard).unwrap_or_else(PoisonError::into_inner);
                continue;
            };
            let remaining = match deadline.checked_duration_since(Instant::now()) {
                Some(remaining) if !remaining.is_zero() => remaining,
                _ => return self.is_ready(ticket),
            };
            let (next, _) = self
                .turn
                .wait_timeout(guard, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            guard = next;
        }
    }

    /// Re-enters [`wait`](Self::wait) in `slice`-sized steps until `ticket`
    /// reaches the head or `timeout` runs out.
    ///
    /// Slices shorter than [`MIN_WAIT_SLICE`] are raised to it. A timeout too
    /// large for the clock waits like [`Timeout::Infinite`].
    ///
    /// Returns whether the ticket is the head.
    pub fn wait_turn(&self, ticket: Ticket, slice: Duration, timeout: Timeout) -> bool {
        let slice = slice.max(MIN_WAIT_SLICE);
        let deadline = match timeout {
            Timeout::Infinite => None,
            Timeout::Duration(d) => deadline_after(d),
        };

        let mut attempts = 0u32;
        loop {
            let step = match deadline {
                Some(dl) => match dl.checked_duration_since(Instant::now()) {
                    Some(remaining) if !remaining.is_zero() => remaining.min(slice),
                    _ => {
                        debug!(%ticket, attempts, "gave up waiting for turn");
                        return self.is_ready(ticket);
                    }
                },
                None => slice,
            };
            if self.wait(ticket, step) {
                return true;
            }
            attempts = attempts.saturating_add(1);
        }
    }

    /// Number of queued tickets, head included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tickets().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tickets().is_empty()
    }
}
