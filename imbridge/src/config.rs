//! Runtime tunables.
//!
//! Hosts deserialize [`BridgeConfig`] from whatever format they already use;
//! missing fields take their defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timeouts, thread counts and thread names for a [`Context`](crate::context::Context).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Upper bound on an off-thread handle release, in milliseconds.
    pub release_timeout_ms: u64,
    /// Length of one wait step while queued behind other tickets.
    pub ticket_wait_slice_ms: u64,
    /// Default deadline for blocking dispatch.
    pub dispatch_timeout_ms: u64,
    pub worker_threads: usize,
    pub worker_thread_name: String,
    pub message_thread_name: String,
    pub home_thread_name: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            release_timeout_ms: 2000,
            ticket_wait_slice_ms: 50,
            dispatch_timeout_ms: 1000,
            worker_threads: 4,
            worker_thread_name: "imbridge-worker".to_owned(),
            message_thread_name: "imbridge-msg".to_owned(),
            home_thread_name: "imbridge-home".to_owned(),
        }
    }
}

impl BridgeConfig {
    #[must_use]
    pub const fn release_timeout(&self) -> Duration {
        Duration::from_millis(self.release_timeout_ms)
    }

    #[must_use]
    pub const fn ticket_wait_slice(&self) -> Duration {
        Duration::from_millis(self.ticket_wait_slice_ms)
    }

    #[must_use]
    pub const fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }
}
