//! Common error types for pinpoint.
//!
//! This module provides the validation errors shared across crates.

use thiserror::Error;

/// A result type using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while validating inbound fingerprints.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The family identifier is empty after normalization.
    #[error("family is required")]
    EmptyFamily,

    /// No sensor category carries a non-empty reading map.
    #[error("sensor data must contain at least one fingerprint")]
    NoFingerprints,

    /// The fingerprint timestamp is zero or negative.
    #[error("timestamp must be a positive unix millisecond value")]
    BadTimestamp,
}
