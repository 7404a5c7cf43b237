//! Subscriber setup for binaries embedding the profiler.
//!
//! The library itself only emits `tracing` events; nothing here runs unless
//! the host calls [`init`].

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub use tracing_subscriber::util::TryInitError;

/// Install a global `fmt` subscriber.
///
/// `RUST_LOG` wins when set and valid; otherwise `level` (for example the
/// configured `log_level`) is used. Fails if a global subscriber is already
/// installed.
pub fn init(level: &str) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
}
