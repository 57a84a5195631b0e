//! Error types for scentctl
//!
//! One thiserror enum covers the whole crate. The three runtime tiers keep
//! their own recovery channels and mostly do *not* surface here: per-ingredient
//! compile problems become [`SkipRecord`](crate::plan::SkipRecord)s, wire
//! failures become unsuccessful [`Response`](crate::protocol::Response)s, and
//! execution failures become [`RunOutcome::Aborted`](crate::exec::RunOutcome).
//! `Error` is reserved for genuinely invalid input or a broken environment.

use thiserror::Error;

/// Main error type for scentctl
#[derive(Error, Debug)]
pub enum Error {
    /// Formula JSON is structurally invalid (e.g. missing `ingredients`)
    #[error("Formula error: {0}")]
    Formula(String),

    /// Channel map or calibration data is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// A command constructor was given out-of-range arguments
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// A calibration factor was rejected by the active policy
    #[error("Calibration rejected: {0}")]
    Calibration(String),

    /// Transition parameters are invalid (e.g. zero steps)
    #[error("Transition error: {0}")]
    Transition(String),

    /// Transport-level failure below the response protocol
    #[error("Transport error: {0}")]
    Transport(String),

    /// JSON parse errors from formula / config / calibration files
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type using the scentctl Error
pub type Result<T> = std::result::Result<T, Error>;
