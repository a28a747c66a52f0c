//! Logging setup.
//!
//! Components log through [`prelude`] so the macro set stays uniform.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub mod prelude {
    pub use ::tracing::{debug, error, info, trace, warn};
}

const DEFAULT_FILTER: &str = "info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install journald output when the journal is reachable, stdout otherwise.
///
/// Filtering follows `RUST_LOG`, defaulting to `info`.
pub fn init_journald_or_stdout() {
    match tracing_journald::layer() {
        Ok(journald) => {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(journald)
                .init();
        }
        Err(_) => init_stdout(),
    }
}

/// Install a human-readable stdout subscriber.
pub fn init_stdout() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_target(false))
        .init();
}
