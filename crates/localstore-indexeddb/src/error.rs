//! Error types for the IndexedDB engine

use localstore_core::StoreError;
use thiserror::Error;
use wasm_bindgen::{JsCast, JsValue};

/// Result type for IndexedDB operations
pub type Result<T> = std::result::Result<T, IndexedDbError>;

/// Errors that can occur during IndexedDB operations
#[derive(Debug, Error)]
pub enum IndexedDbError {
    /// IndexedDB (or localStorage) is not available in this environment
    #[error("not available: {0}")]
    NotAvailable(String),

    /// Database open/upgrade error
    #[error("IndexedDB open error: {0}")]
    Open(String),

    /// Another connection holds an older version open
    #[error("IndexedDB open blocked: {0}")]
    Blocked(String),

    /// Transaction error
    #[error("IndexedDB transaction error: {0}")]
    Transaction(String),

    /// Request failed with a DOMException
    #[error("IndexedDB {name}: {message}")]
    Request { name: String, message: String },

    /// JavaScript value conversion error
    #[error("JS conversion error: {0}")]
    JsValue(String),

    /// Record-level failure raised by the shared record model
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IndexedDbError {
    /// DOMException name of a failed request, if that is what this is
    pub fn dom_name(&self) -> Option<&str> {
        match self {
            IndexedDbError::Request { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// Describe a rejected JS value: DOMException name and message when it is one.
pub fn describe(val: &JsValue) -> (String, String) {
    if let Some(exception) = val.dyn_ref::<web_sys::DomException>() {
        return (exception.name(), exception.message());
    }
    if let Some(error) = val.dyn_ref::<js_sys::Error>() {
        return (String::from(error.name()), String::from(error.message()));
    }
    let message = val
        .as_string()
        .or_else(|| js_sys::JSON::stringify(val).ok().map(String::from))
        .unwrap_or_else(|| format!("{:?}", val));
    ("Error".to_string(), message)
}

impl From<JsValue> for IndexedDbError {
    fn from(val: JsValue) -> Self {
        let (name, message) = describe(&val);
        IndexedDbError::Request { name, message }
    }
}

impl From<serde_wasm_bindgen::Error> for IndexedDbError {
    fn from(err: serde_wasm_bindgen::Error) -> Self {
        IndexedDbError::Store(StoreError::Serialization(err.to_string()))
    }
}

/// Convert IndexedDbError to StoreError for the engine traits
impl From<IndexedDbError> for StoreError {
    fn from(err: IndexedDbError) -> Self {
        match err {
            IndexedDbError::Store(e) => e,
            IndexedDbError::NotAvailable(msg) => {
                StoreError::EngineUnavailable(format!("not available: {}", msg))
            }
            IndexedDbError::Open(msg) => StoreError::EngineUnavailable(format!("IndexedDB open: {}", msg)),
            IndexedDbError::Blocked(msg) => {
                StoreError::EngineUnavailable(format!("IndexedDB open blocked: {}", msg))
            }
            IndexedDbError::Transaction(msg) => {
                StoreError::Transaction(format!("IndexedDB transaction: {}", msg))
            }
            IndexedDbError::Request { name, message } if name == "NotFoundError" => {
                StoreError::SchemaMismatch(message)
            }
            IndexedDbError::Request { name, message } if name == "DataError" => {
                StoreError::InvalidKey(message)
            }
            IndexedDbError::Request { name, message } if name == "DataCloneError" => {
                StoreError::Serialization(message)
            }
            IndexedDbError::Request { name, message } => {
                StoreError::Transaction(format!("IndexedDB {}: {}", name, message))
            }
            IndexedDbError::JsValue(msg) => StoreError::Serialization(format!("IndexedDB JS: {}", msg)),
        }
    }
}
