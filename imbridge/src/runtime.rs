//! Thread-owning runtime pieces.
//!
//! - `pool`: named worker threads behind the [`Scheduler`](pool::Scheduler) seam.
//! - `dispatcher`: turns pool submission into a blocking call with a deadline.
//! - `message`: single-consumer FIFO execution queue.
//! - `home`: a dedicated owner thread with its own event loop.
//! - `handle`: thread-affine handles that are always released on their home thread.

pub mod dispatcher;
pub mod handle;
pub mod home;
pub mod message;
pub mod pool;
