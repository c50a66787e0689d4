//! Deadline-bounded, single-assignment value slot.
//!
//! A [`BlockingResult`] is created per blocking call. The waiting side keeps
//! the `BlockingResult` and hands a [`ResultSetter`] to whoever produces the
//! value (a worker-pool task, a job posted to another thread's event loop).
//!
//! ```
//! use std::time::Duration;
//! use imbridge::sync::blocking::BlockingResult;
//!
//! let result = BlockingResult::new(Duration::from_millis(500));
//! let setter = result.setter();
//! std::thread::spawn(move || {
//!     setter.set(7);
//! });
//! assert_eq!(result.get_value().unwrap(), 7);
//! ```
//!
//! # Assignment policy
//!
//! The first [`ResultSetter::set`] wins. Later calls are ignored and report
//! `false`, including calls made after the value has already been read.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use minstant::Instant;
use thiserror::Error;

use crate::sync::deadline_after;

/// A blocking wait ran past its deadline without a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no value within {waited:?}")]
pub struct TimeoutError {
    /// How long the slot allowed the caller to wait.
    pub waited: Duration,
}

struct Slot<T> {
    value: Option<T>,
    assigned: bool,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
    /// `None` when `timeout` reaches past what the clock can represent.
    deadline: Option<Instant>,
    timeout: Duration,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Read end of the slot. Reading consumes it, so a value is read at most once.
pub struct BlockingResult<T> {
    shared: Arc<Shared<T>>,
}

/// Write end of the slot. Cloneable so it can be moved into a closure that
/// may itself be cloned, but only the first `set` stores anything.
pub struct ResultSetter<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ResultSetter<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> BlockingResult<T> {
    /// Creates an empty slot whose deadline is `timeout` from now.
    ///
    /// A timeout too large for the clock means the read waits for the value
    /// without a deadline.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot {
                    value: None,
                    assigned: false,
                }),
                ready: Condvar::new(),
                deadline: deadline_after(timeout),
                timeout,
            }),
        }
    }

    /// Returns a write end for the producer.
    #[must_use]
    pub fn setter(&self) -> ResultSetter<T> {
        ResultSetter {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Returns the instant after which [`get_value`](Self::get_value) stops
    /// waiting, or `None` if it waits without a deadline.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.shared.deadline
    }

    /// Returns `true` once a value has been stored.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.shared.lock().assigned
    }

    /// Blocks until the value is set or the deadline passes.
    ///
    /// A value that is already present is returned even if the deadline has
    /// passed.
    ///
    /// # Errors
    ///
    /// Returns [`TimeoutError`] if no value arrived before the deadline.
    pub fn get_value(self) -> Result<T, TimeoutError> {
        let shared = &self.shared;
        let mut slot = shared.lock();
        loop {
            if let Some(value) = slot.value.take() {
                return Ok(value);
            }
            let Some(deadline) = shared.deadline else {
                slot = shared.ready.wait(slot).unwrap_or_else(PoisonError::into_inner);
                continue;
            };
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return Err(TimeoutError {
                    waited: shared.timeout,
                });
            };
            if remaining.is_zero() {
                return Err(TimeoutError {
                    waited: shared.timeout,
                });
            }
            let (guard, _) = shared
                .ready
                .wait_timeout(slot, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            slot = guard;
        }
    }
}

impl<T: Default> BlockingResult<T> {
    /// Like [`get_value`](Self::get_value) but degrades to `T::default()`.
    ///
    /// The second element is `true` when the wait timed out.
    #[must_use]
    pub fn get_value_or_default(self) -> (T, bool) {
        match self.get_value() {
            Ok(value) => (value, false),
            Err(_) => (T::default(), true),
        }
    }
}

impl<T> ResultSetter<T> {
    /// Stores `value` and wakes the reader.
    ///
    /// Returns `false` if a value was already assigned; `value` is dropped.
    pub fn set(&self, value: T) -> bool {
        let mut slot = self.shared.lock();
        if slot.assigned {
            return false;
        }
        slot.assigned = true;
        slot.value = Some(value);
        drop(slot);
        self.shared.ready.notify_all();
        true
    }
}
