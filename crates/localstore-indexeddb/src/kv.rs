//! `localStorage` as the fallback key/value namespace

use localstore_core::{KeyValueStore, StoreError, StoreResult};
use web_sys::Storage;

use crate::error::{describe, IndexedDbError};

/// `KeyValueStore` over a Web Storage area.
#[derive(Debug, Clone)]
pub struct WebStorageKv {
    storage: Storage,
}

impl WebStorageKv {
    /// The page's `localStorage`.
    ///
    /// Fails where there is no window (workers) or storage is disabled.
    pub fn local() -> StoreResult<Self> {
        let window = web_sys::window()
            .ok_or_else(|| IndexedDbError::NotAvailable("no window".into()))?;
        let storage = window
            .local_storage()
            .map_err(|e| IndexedDbError::NotAvailable(format!("localStorage: {}", describe(&e).1)))?
            .ok_or_else(|| IndexedDbError::NotAvailable("localStorage is disabled".into()))?;
        Ok(Self { storage })
    }

    /// Wrap any storage area (e.g. `sessionStorage`).
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }
}

fn storage_error(op: &str, key: &str, e: wasm_bindgen::JsValue) -> StoreError {
    let (name, message) = describe(&e);
    StoreError::Transaction(format!("localStorage {} '{}': {}: {}", op, key, name, message))
}

impl KeyValueStore for WebStorageKv {
    fn get_item(&self, key: &str) -> StoreResult<Option<String>> {
        self.storage
            .get_item(key)
            .map_err(|e| storage_error("read", key, e))
    }

    /// Quota failures surface as a transaction error.
    fn set_item(&self, key: &str, value: &str) -> StoreResult<()> {
        self.storage
            .set_item(key, value)
            .map_err(|e| storage_error("write", key, e))
    }

    fn remove_item(&self, key: &str) -> StoreResult<()> {
        self.storage
            .remove_item(key)
            .map_err(|e| storage_error("remove", key, e))
    }
}
