//! Concurrency layer for an input-method control channel.
//!
//! - [`sync`]: deadline-bounded result slots and FIFO ticket admission.
//! - [`runtime`]: worker pool, blocking dispatch, the single-consumer message
//!   queue and thread-affine handles.
//! - [`control`]: request/reply marshalling between the service side and
//!   worker-side handlers.
//! - [`unbind`]: cleanup selection when a binding ends.
//! - [`context`]: the process-wide services, passed explicitly.

pub mod config;
pub mod context;
pub mod control;
pub mod runtime;
pub mod sync;
pub mod trace;
pub mod unbind;

use std::io;

use thiserror::Error;

pub use config::BridgeConfig;
pub use context::Context;
pub use trace::init_tracing;

use control::ControlError;
use runtime::dispatcher::DispatchError;
use runtime::handle::{HandleError, ResourceAbandoned};
use runtime::message::{AllocationError, QueueClosed};
use sync::blocking::TimeoutError;

/// Crate-level error for callers that do not care which layer failed.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to spawn thread: {0}")]
    Spawn(#[from] io::Error),

    #[error(transparent)]
    Control(#[from] ControlError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error(transparent)]
    QueueClosed(#[from] QueueClosed),

    #[error(transparent)]
    Handle(#[from] HandleError),

    #[error(transparent)]
    Abandoned(#[from] ResourceAbandoned),
}
