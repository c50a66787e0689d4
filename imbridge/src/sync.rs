//! Blocking primitives shared by every other component.
//!
//! - [`blocking`]: single-assignment value slot with a deadline.
//! - [`ticket`]: FIFO admission queue for a contended resource.

pub mod blocking;
pub mod ticket;

use std::time::Duration;

use minstant::Instant;

/// Timeout specification for blocking operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Wait indefinitely.
    Infinite,
    /// Wait for at most the specified duration.
    Duration(Duration),
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Self::Duration(d)
    }
}

/// Timeouts longer than this are waited out without a deadline.
pub const UNBOUNDED_WAIT: Duration = Duration::from_secs(u32::MAX as u64);

/// `timeout` from now, or `None` ("no deadline") for timeouts of at least
/// [`UNBOUNDED_WAIT`] or past what the clock can represent.
pub(crate) fn deadline_after(timeout: Duration) -> Option<Instant> {
    if timeout >= UNBOUNDED_WAIT {
        return None;
    }
    Instant::now().checked_add(timeout)
}
