//! Error types for the SQLite engine

use localstore_core::StoreError;
use thiserror::Error;

/// Result type for SQLite engine operations
pub type Result<T> = std::result::Result<T, SqliteError>;

/// Errors that can occur inside the SQLite engine
#[derive(Debug, Error)]
pub enum SqliteError {
    /// Database connection or query error
    #[error("SQLite error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Stored body is not a JSON object
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The file was written by a newer schema
    #[error("database '{database}' is at version {found}, cannot open at {requested}")]
    VersionTooHigh {
        database: String,
        found: u32,
        requested: u32,
    },

    /// Operation on a closed connection
    #[error("connection is closed")]
    Closed,

    /// IO error (for file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record-level failure raised by the shared record model
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Convert SqliteError to StoreError for the engine traits
impl From<SqliteError> for StoreError {
    fn from(err: SqliteError) -> Self {
        match err {
            SqliteError::Store(e) => e,
            SqliteError::Json(e) => StoreError::Serialization(e.to_string()),
            SqliteError::Database(e) => StoreError::Transaction(format!("SQLite: {}", e)),
            e @ SqliteError::VersionTooHigh { .. } => StoreError::EngineUnavailable(e.to_string()),
            SqliteError::Closed => StoreError::EngineUnavailable("SQLite connection is closed".into()),
            SqliteError::Io(e) => StoreError::EngineUnavailable(format!("IO: {}", e)),
        }
    }
}
