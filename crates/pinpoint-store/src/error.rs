//! Error types for the storage layer.

use thiserror::Error;

/// A result type using `StoreError`.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during storage operations.
///
/// SQL failures always carry the name of the store operation that issued
/// them; callers propagate these unchanged.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested record was not found.
    #[error("{0}: no rows found")]
    NotFound(&'static str),

    /// A SQL statement failed.
    #[error("{op}: {source}")]
    Sql {
        /// The store operation that issued the statement.
        op: &'static str,
        /// The underlying SQLite error.
        #[source]
        source: rusqlite::Error,
    },

    /// A keystore value could not be encoded or decoded.
    #[error("{op}: {source}")]
    Json {
        /// The store operation that (de)serialized the value.
        op: &'static str,
        /// The underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// A compressed reading map or dictionary could not be decoded.
    #[error("compressor: {0}")]
    Compressor(String),

    /// The family name is empty after normalization.
    #[error("family is required")]
    EmptyFamily,

    /// A caller passed an argument the operation cannot act on.
    #[error("{0}")]
    InvalidArgument(&'static str),

    /// A sensor category is not a usable column name.
    #[error("invalid sensor category: {0:?}")]
    InvalidCategory(String),

    /// The database file or data directory could not be accessed.
    #[error("{op}: {source}")]
    Io {
        /// The store operation that touched the filesystem.
        op: &'static str,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    /// Wrap a SQLite error with the operation that issued it.
    #[must_use]
    pub fn sql(op: &'static str) -> impl FnOnce(rusqlite::Error) -> Self {
        move |source| Self::Sql { op, source }
    }

    /// Wrap a serde error with the operation that issued it.
    #[must_use]
    pub fn json(op: &'static str) -> impl FnOnce(serde_json::Error) -> Self {
        move |source| Self::Json { op, source }
    }
}
