//! Common error types for localstore components.

use localstore_core::StoreError;
use thiserror::Error;

/// Common error type for localstore operations outside a single store call.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Store error
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type alias using localstore Error.
pub type Result<T> = std::result::Result<T, Error>;
