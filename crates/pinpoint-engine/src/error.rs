//! Error types for the analysis engine.

use thiserror::Error;

use crate::classifier::ClassifierError;

/// A result type using `EngineError`.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur in pipeline and aggregator operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The inbound fingerprint failed validation.
    #[error("problem validating data: {0}")]
    Validation(#[from] pinpoint_core::CoreError),

    /// Storage layer error, already wrapped with the failing operation.
    #[error(transparent)]
    Store(#[from] pinpoint_store::StoreError),

    /// Classifier error.
    #[error(transparent)]
    Classifier(#[from] ClassifierError),

    /// Analysis produced an empty guess list.
    #[error("no guesses")]
    NoGuesses,

    /// A bounded operation exceeded its deadline.
    #[error("{0} timed out")]
    Timeout(&'static str),

    /// A payload could not be encoded.
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}
