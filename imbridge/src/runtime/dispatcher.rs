//! Blocking task dispatcher.
//!
//! Wraps a closure so it runs on a [`Scheduler`] and the submitting thread
//! blocks, for at most a caller-given timeout, for its result. Timing out
//! only stops the caller from waiting: the submitted work always runs to
//! completion and its late result is discarded.

use std::time::Duration;

use thiserror::Error;

use crate::runtime::pool::{Rejected, Scheduler};
use crate::sync::blocking::{BlockingResult, TimeoutError};
use crate::trace::{trace, warn};

/// Why a blocking dispatch produced no value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The scheduler refused the task; nothing was run.
    #[error("task rejected: {0}")]
    Rejected(#[from] Rejected),
    /// The task did not finish before the deadline. It may still be running.
    #[error("task timed out: {0}")]
    Timeout(#[from] TimeoutError),
}

/// Submits work to a scheduler and blocks for the outcome.
pub struct BlockingDispatcher<S> {
    scheduler: S,
    default_timeout: Duration,
}

impl<S: Scheduler> BlockingDispatcher<S> {
    #[must_use]
    pub fn new(scheduler: S, default_timeout: Duration) -> Self {
        Self {
            scheduler,
            default_timeout,
        }
    }

    /// The scheduler tasks are submitted to.
    pub const fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// Timeout used by [`run_default`](Self::run_default).
    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Runs `work` on the scheduler and waits up to `timeout` for its value.
    ///
    /// # Errors
    ///
    /// [`DispatchError::Rejected`] if submission failed,
    /// [`DispatchError::Timeout`] if the deadline passed first.
    pub fn run<T, F>(&self, work: F, timeout: Duration) -> Result<T, DispatchError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let result = BlockingResult::new(timeout);
        let setter = result.setter();

        self.scheduler.submit(Box::new(move || {
            setter.set(work());
        }))?;

        result.get_value().map_err(|err| {
            warn!(timeout_ms = timeout.as_millis() as u64, "blocking dispatch timed out");
            DispatchError::from(err)
        })
    }

    /// Runs `work` that produces no value and waits up to `timeout` for it to finish.
    ///
    /// # Errors
    ///
    /// Same as [`run`](Self::run).
    pub fn run_unit<F>(&self, work: F, timeout: Duration) -> Result<(), DispatchError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.run(work, timeout)
    }

    /// [`run`](Self::run) with the dispatcher's default timeout.
    ///
    /// # Errors
    ///
    /// Same as [`run`](Self::run).
    pub fn run_default<T, F>(&self, work: F) -> Result<T, DispatchError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.run(work, self.default_timeout)
    }

    /// Runs `work` and falls back to `T::default()` on rejection or timeout.
    ///
    /// The flag is `true` when the fallback was used.
    pub fn run_or_default<T, F>(&self, work: F, timeout: Duration) -> (T, bool)
    where
        T: Default + Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        match self.run(work, timeout) {
            Ok(value) => (value, false),
            Err(err) => {
                trace!(error = %err, "dispatch degraded to default");
                (T::default(), true)
            }
        }
    }
}
