//! Error types shared across heatguard.

use thiserror::Error;

/// Errors raised by heatguard components.
///
/// Only [`Error::Configuration`] is allowed to abort startup. Everything
/// else is caught at the message or alert boundary and logged.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Contract violation by the caller, e.g. mismatched sources passed to
    /// a rate check. Fails the single operation only.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Publish failure. The command or speed update is dropped.
    #[error("transport error: {0}")]
    Transport(String),

    /// Timestamp was neither ISO-8601 nor numeric epoch seconds.
    #[error("unparseable timestamp {0:?}")]
    Timestamp(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
