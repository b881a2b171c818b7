//! Storage error types

use thiserror::Error;

use crate::record::Key;

/// Errors that can occur during local store operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// The primary engine could not be opened or is absent.
    ///
    /// In `Auto` mode this is absorbed by `init()` and turned into degraded mode;
    /// callers only see it when the store was built with `EngineMode::PrimaryOnly`.
    #[error("storage engine unavailable: {0}")]
    EngineUnavailable(String),

    /// A record with this key already exists in the store
    #[error("duplicate key {key} in store '{store}'")]
    DuplicateKey { store: String, key: Key },

    /// A unique index already holds the value being written
    #[error("unique index '{index}' violated in store '{store}'")]
    Constraint { store: String, index: String },

    /// Store or index is not declared in the schema (or missing from the engine)
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Key is missing or not a valid key value
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Record could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Engine-level failure during a single operation; safe to retry
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Invalid schema descriptor or configuration
    #[error("configuration error: {0}")]
    Config(String),
}

/// Coarse classification of a [`StoreError`], stable across backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    EngineUnavailable,
    DuplicateKey,
    Constraint,
    SchemaMismatch,
    InvalidKey,
    Serialization,
    Transaction,
    Config,
}

impl ErrorKind {
    /// Stable name, used as the prefix of errors crossing the JS boundary.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::EngineUnavailable => "EngineUnavailable",
            ErrorKind::DuplicateKey => "DuplicateKeyError",
            ErrorKind::Constraint => "ConstraintError",
            ErrorKind::SchemaMismatch => "SchemaMismatch",
            ErrorKind::InvalidKey => "InvalidKey",
            ErrorKind::Serialization => "SerializationError",
            ErrorKind::Transaction => "TransactionError",
            ErrorKind::Config => "ConfigError",
        }
    }
}

impl StoreError {
    /// The kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::EngineUnavailable(_) => ErrorKind::EngineUnavailable,
            StoreError::DuplicateKey { .. } => ErrorKind::DuplicateKey,
            StoreError::Constraint { .. } => ErrorKind::Constraint,
            StoreError::SchemaMismatch(_) => ErrorKind::SchemaMismatch,
            StoreError::InvalidKey(_) => ErrorKind::InvalidKey,
            StoreError::Serialization(_) => ErrorKind::Serialization,
            StoreError::Transaction(_) => ErrorKind::Transaction,
            StoreError::Config(_) => ErrorKind::Config,
        }
    }

    /// Whether retrying the same single operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Transaction(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;
