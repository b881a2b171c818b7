//! wasm-bindgen surface: the `LocalStore` JS class
//!
//! Records cross the boundary as plain JS objects (serde-wasm-bindgen,
//! JSON-compatible mode). Every async method returns a Promise; the store is
//! shared with the in-flight futures through an `Rc` because WASM is
//! single-threaded.

use std::rc::Rc;

use localstore_core::{
    Key, KeyValueStore, LocalStore, MemoryKv, Record, Snapshot, StoreError, StoreResult,
};
use localstore_indexeddb::{IndexedDbEngine, WebStorageKv};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::future_to_promise;

use crate::{error_message, parse_mode};

/// Fallback namespace: `localStorage` when the page has it, memory otherwise.
#[derive(Debug, Clone)]
pub enum BrowserKv {
    Web(WebStorageKv),
    Memory(MemoryKv),
}

impl BrowserKv {
    fn detect() -> Self {
        match WebStorageKv::local() {
            Ok(kv) => BrowserKv::Web(kv),
            Err(e) => {
                warn!(error = %e, "⊔ localStorage unavailable, fallback data will not persist");
                BrowserKv::Memory(MemoryKv::new())
            }
        }
    }
}

impl KeyValueStore for BrowserKv {
    fn get_item(&self, key: &str) -> StoreResult<Option<String>> {
        match self {
            BrowserKv::Web(kv) => kv.get_item(key),
            BrowserKv::Memory(kv) => kv.get_item(key),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> StoreResult<()> {
        match self {
            BrowserKv::Web(kv) => kv.set_item(key, value),
            BrowserKv::Memory(kv) => kv.set_item(key, value),
        }
    }

    fn remove_item(&self, key: &str) -> StoreResult<()> {
        match self {
            BrowserKv::Web(kv) => kv.remove_item(key),
            BrowserKv::Memory(kv) => kv.remove_item(key),
        }
    }
}

type BrowserStore = LocalStore<IndexedDbEngine, BrowserKv>;

fn js_error(err: StoreError) -> JsValue {
    js_sys::Error::new(&error_message(&err)).into()
}

fn from_js<T: serde::de::DeserializeOwned>(what: &str, val: JsValue) -> StoreResult<T> {
    serde_wasm_bindgen::from_value(val)
        .map_err(|e| StoreError::Serialization(format!("invalid {}: {}", what, e)))
}

fn to_js<T: Serialize>(value: &T) -> StoreResult<JsValue> {
    let serializer = serde_wasm_bindgen::Serializer::json_compatible();
    value
        .serialize(&serializer)
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

fn key_from_js(val: JsValue) -> StoreResult<Key> {
    let value: Value = from_js("key", val)?;
    Key::try_from_value(&value)
}

fn record_from_js(val: JsValue) -> StoreResult<Record> {
    match from_js::<Value>("record", val)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Serialization(format!(
            "record must be an object, got {}",
            other
        ))),
    }
}

/// Run `op` against the store and hand the outcome to JS as a Promise.
fn promise<F, Fut, T>(store: &Rc<BrowserStore>, op: F) -> js_sys::Promise
where
    F: FnOnce(Rc<BrowserStore>) -> Fut + 'static,
    Fut: std::future::Future<Output = StoreResult<T>> + 'static,
    T: Serialize,
{
    let store = Rc::clone(store);
    future_to_promise(async move {
        let value = op(store).await.map_err(js_error)?;
        to_js(&value).map_err(js_error)
    })
}

/// A schema-versioned local store, exported to JS as `LocalStore`.
#[wasm_bindgen(js_name = LocalStore)]
pub struct JsLocalStore {
    store: Rc<BrowserStore>,
}

#[wasm_bindgen(js_class = LocalStore)]
impl JsLocalStore {
    /// `new LocalStore(schema, mode?)`. Throws on an invalid schema.
    #[wasm_bindgen(constructor)]
    pub fn new(schema: JsValue, mode: Option<String>) -> Result<JsLocalStore, JsValue> {
        // Route Rust panics to console.error instead of "RuntimeError: unreachable"
        console_error_panic_hook::set_once();

        let schema = from_js("schema", schema).map_err(js_error)?;
        let mode = parse_mode(mode.as_deref()).map_err(js_error)?;
        let store = BrowserStore::builder(schema)
            .mode(mode)
            .build(IndexedDbEngine::new(), BrowserKv::detect())
            .map_err(js_error)?;
        Ok(JsLocalStore {
            store: Rc::new(store),
        })
    }

    /// Open the database. Never rejects; check `isDegraded` afterwards.
    pub fn init(&self) -> js_sys::Promise {
        promise(&self.store, |store| async move {
            store.init().await;
            Ok(())
        })
    }

    #[wasm_bindgen(js_name = isDegraded)]
    pub fn is_degraded(&self) -> bool {
        self.store.is_degraded()
    }

    #[wasm_bindgen(js_name = degradedReason)]
    pub fn degraded_reason(&self) -> Option<String> {
        self.store.degraded_reason().map(str::to_string)
    }

    /// Resolves to the record, or `null` when absent.
    pub fn get(&self, store_name: String, key: JsValue) -> js_sys::Promise {
        promise(&self.store, |store| async move {
            let key = key_from_js(key)?;
            store.get(&store_name, key).await
        })
    }

    #[wasm_bindgen(js_name = getAll)]
    pub fn get_all(&self, store_name: String) -> js_sys::Promise {
        promise(&self.store, |store| async move { store.get_all(&store_name).await })
    }

    #[wasm_bindgen(js_name = getByIndex)]
    pub fn get_by_index(&self, store_name: String, index: String, value: JsValue) -> js_sys::Promise {
        promise(&self.store, |store| async move {
            let value: Value = from_js("index value", value)?;
            store.get_by_index(&store_name, &index, value).await
        })
    }

    /// Insert a new record; resolves to its key.
    pub fn add(&self, store_name: String, record: JsValue) -> js_sys::Promise {
        promise(&self.store, |store| async move {
            let record = record_from_js(record)?;
            store.add(&store_name, record).await
        })
    }

    /// Insert or replace a record by its key.
    pub fn update(&self, store_name: String, record: JsValue) -> js_sys::Promise {
        promise(&self.store, |store| async move {
            let record = record_from_js(record)?;
            store.update(&store_name, record).await
        })
    }

    pub fn delete(&self, store_name: String, key: JsValue) -> js_sys::Promise {
        promise(&self.store, |store| async move {
            let key = key_from_js(key)?;
            store.delete(&store_name, key).await
        })
    }

    pub fn count(&self, store_name: String) -> js_sys::Promise {
        promise(&self.store, |store| async move { store.count(&store_name).await })
    }

    pub fn keys(&self, store_name: String) -> js_sys::Promise {
        promise(&self.store, |store| async move { store.keys(&store_name).await })
    }

    pub fn clear(&self, store_name: String) -> js_sys::Promise {
        promise(&self.store, |store| async move { store.clear(&store_name).await })
    }

    #[wasm_bindgen(js_name = clearAll)]
    pub fn clear_all(&self) -> js_sys::Promise {
        promise(&self.store, |store| async move { store.clear_all().await })
    }

    /// Resolves to `{ database, version, exportedAt, stores: { name: [records] } }`.
    pub fn export(&self) -> js_sys::Promise {
        promise(&self.store, |store| async move { store.export().await })
    }

    /// Load a snapshot produced by `export`; resolves to the records written.
    pub fn import(&self, snapshot: JsValue) -> js_sys::Promise {
        promise(&self.store, |store| async move {
            let snapshot: Snapshot = from_js("snapshot", snapshot)?;
            store.import(snapshot).await
        })
    }

    pub fn stats(&self) -> js_sys::Promise {
        promise(&self.store, |store| async move { store.stats().await })
    }

    /// Resolves to the saved document, or `undefined` if none was saved. A
    /// saved `null` resolves to `null`.
    #[wasm_bindgen(js_name = loadDocument)]
    pub fn load_document(&self, store_name: String) -> js_sys::Promise {
        let store = Rc::clone(&self.store);
        future_to_promise(async move {
            match store.load_document(&store_name).await.map_err(js_error)? {
                Some(doc) => to_js(&doc).map_err(js_error),
                None => Ok(JsValue::UNDEFINED),
            }
        })
    }

    #[wasm_bindgen(js_name = saveDocument)]
    pub fn save_document(&self, store_name: String, value: JsValue) -> js_sys::Promise {
        promise(&self.store, |store| async move {
            let value: Value = from_js("document", value)?;
            store.save_document(&store_name, value).await
        })
    }

    /// Close the database. The JS object is unusable afterwards.
    pub fn close(self) {
        // Pending promises keep their own handle; the last one to finish closes it.
        if let Ok(store) = Rc::try_unwrap(self.store) {
            store.close();
        }
    }
}
