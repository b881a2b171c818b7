//! Synchronous key/value namespace used as the fallback engine.
//!
//! Mirrors the `localStorage` contract: flat string keys, string values,
//! no transactions, no indexing.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::engine::MaybeSendSync;
use crate::error::StoreResult;

/// A flat, synchronous string key/value store.
pub trait KeyValueStore: MaybeSendSync {
    /// Read an entry. Returns `None` if absent.
    fn get_item(&self, key: &str) -> StoreResult<Option<String>>;

    /// Write an entry, replacing any previous value.
    fn set_item(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Remove an entry. Absent keys are not an error.
    fn remove_item(&self, key: &str) -> StoreResult<()>;
}

/// In-process key/value store.
///
/// Clones share the same namespace. [`MemoryKv::shared`] hands out the
/// process-wide namespace, the native counterpart of the browser's single
/// `localStorage`.
#[derive(Debug, Clone, Default)]
pub struct MemoryKv {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

static SHARED: OnceLock<MemoryKv> = OnceLock::new();

impl MemoryKv {
    /// A fresh, private namespace.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide namespace.
    pub fn shared() -> Self {
        SHARED.get_or_init(MemoryKv::new).clone()
    }

    /// Number of entries (for testing).
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// All entry names, sorted (for testing).
    pub fn item_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl KeyValueStore for MemoryKv {
    fn get_item(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> StoreResult<()> {
        self.entries
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> StoreResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_remove() {
        let kv = MemoryKv::new();
        assert_eq!(kv.get_item("a").unwrap(), None);

        kv.set_item("a", "1").unwrap();
        assert_eq!(kv.get_item("a").unwrap().as_deref(), Some("1"));

        kv.remove_item("a").unwrap();
        kv.remove_item("a").unwrap();
        assert!(kv.is_empty());
    }

    #[test]
    fn test_clones_share_namespace() {
        let kv = MemoryKv::new();
        let other = kv.clone();
        kv.set_item("x", "y").unwrap();
        assert_eq!(other.get_item("x").unwrap().as_deref(), Some("y"));
        assert!(MemoryKv::new().get_item("x").unwrap().is_none());
    }

    #[test]
    fn test_shared_is_process_wide() {
        MemoryKv::shared().set_item("kv-test:shared", "1").unwrap();
        assert!(MemoryKv::shared().get_item("kv-test:shared").unwrap().is_some());
        MemoryKv::shared().remove_item("kv-test:shared").unwrap();
    }
}
