//! Error types for the telemetry probes.
//!
//! Most probes degrade to documented defaults instead of failing; only the
//! per-process usage probe surfaces errors, since there is no meaningful
//! zero-default for "current process" figures.

use thiserror::Error;

/// Errors that can occur while collecting telemetry.
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// The queried process does not exist (or has already exited).
    #[error("Process not found: pid {0}")]
    ProcessNotFound(u32),

    /// The per-process usage source failed to produce a sample.
    #[error("Failed to sample process usage: {0}")]
    ProcessSample(String),
}

/// Result type alias for telemetry operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;
