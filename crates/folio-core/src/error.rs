//! Error types for the folio core.

use thiserror::Error;

/// Result type alias using the store error type.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by a [`KvStore`](crate::kv::KvStore) backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Stored value could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored key could not be decoded.
    #[error("key decode error: {0}")]
    KeyDecode(String),

    /// I/O error (creating the database directory, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
