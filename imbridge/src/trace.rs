//! Log macros used throughout imbridge.
//!
//! The `tracing` feature is on by default. Levels as used by the crate:
//!
//! - `error`: a handler or job panicked, or a handle was created or released
//!   off its home thread.
//! - `warn`: a control request was rejected or a blocking wait timed out.
//! - `info`/`debug`: worker threads, the message consumer and the home loop
//!   starting and stopping.
//! - `trace`: per message and per request chatter.
//!
//! Building with `default-features = false` turns every macro here into an
//! empty expansion.

/// Environment variable read before `RUST_LOG`.
pub const LOG_ENV: &str = "IMBRIDGE_LOG";

/// Directive used when neither [`LOG_ENV`] nor `RUST_LOG` is set.
pub const DEFAULT_DIRECTIVE: &str = "imbridge=info";

/// Picks the filter directive: the first set, non-blank value, else
/// [`DEFAULT_DIRECTIVE`].
#[cfg_attr(not(feature = "tracing"), allow(dead_code))]
fn directive_from(imbridge_log: Option<String>, rust_log: Option<String>) -> String {
    [imbridge_log, rust_log]
        .into_iter()
        .flatten()
        .find(|v| !v.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_DIRECTIVE.to_owned())
}

/// Installs a process-wide fmt subscriber with thread names and uptime.
///
/// Another subscriber already being installed is not an error; the call
/// then does nothing.
#[cfg(feature = "tracing")]
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let directive = directive_from(std::env::var(LOG_ENV).ok(), std::env::var("RUST_LOG").ok());
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_thread_names(true)
                .with_thread_ids(true)
                .with_target(true)
                .with_file(false)
                .with_line_number(false)
                .with_timer(fmt::time::uptime()),
        )
        .with(filter)
        .try_init();
}

#[cfg(not(feature = "tracing"))]
pub const fn init_tracing() {}

#[cfg(feature = "tracing")]
pub(crate) use tracing::{debug, error, info, trace, warn};

#[cfg(not(feature = "tracing"))]
macro_rules! discard {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
pub(crate) use {discard as debug, discard as error, discard as info, discard as trace, discard as warn};
