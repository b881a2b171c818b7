//! IndexedDB engine implementing the `Engine` and `Connection` traits.
//!
//! Records are stored as plain JS objects (serde-wasm-bindgen, JSON-compatible
//! mode) so other code on the page reading the same database sees ordinary
//! objects. Keys are inline at the store's key path.
//!
//! Duplicate keys and unique-index clashes are checked in a read-only
//! transaction before the write so they can be reported precisely; the engine's
//! own constraint check still guards the write itself.

use async_trait::async_trait;
use localstore_core::record::{is_indexable, key_of, resolve_path};
use localstore_core::{
    Connection, DatabaseSchema, Engine, IndexSchema, Key, Record, StoreError, StoreResult,
    StoreSchema,
};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{IdbDatabase, IdbTransactionMode};

use crate::error::{IndexedDbError, Result};
use crate::idb;

/// Browser IndexedDB engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexedDbEngine;

impl IndexedDbEngine {
    pub fn new() -> Self {
        Self
    }

    /// Whether `indexedDB` exists on the global object at all.
    pub fn is_available() -> bool {
        idb::idb_factory().is_ok()
    }

    /// Delete a database (for testing/cleanup).
    pub async fn delete_database(name: &str) -> StoreResult<()> {
        Ok(idb::delete_database(name).await?)
    }
}

#[async_trait(?Send)]
impl Engine for IndexedDbEngine {
    type Connection = IndexedDbConnection;

    fn name(&self) -> &'static str {
        "indexeddb"
    }

    async fn open(&self, schema: &DatabaseSchema) -> StoreResult<IndexedDbConnection> {
        let db = idb::open_database(schema).await?;
        Ok(IndexedDbConnection::new(db))
    }
}

/// One open IndexedDB database.
///
/// Closes itself when another tab asks for a newer version, so that tab's
/// upgrade is not blocked.
pub struct IndexedDbConnection {
    db: IdbDatabase,
    _on_version_change: Closure<dyn FnMut(web_sys::Event)>,
}

impl IndexedDbConnection {
    fn new(db: IdbDatabase) -> Self {
        let db_for_close = db.clone();
        let on_version_change = Closure::wrap(Box::new(move |_event: web_sys::Event| {
            debug!(db = %db_for_close.name(), "⊔ newer version requested elsewhere, closing");
            db_for_close.close();
        }) as Box<dyn FnMut(web_sys::Event)>);
        db.set_onversionchange(Some(on_version_change.as_ref().unchecked_ref()));

        Self {
            db,
            _on_version_change: on_version_change,
        }
    }

    /// The underlying database handle.
    pub fn database(&self) -> &IdbDatabase {
        &self.db
    }

    async fn read(
        &self,
        store: &str,
        request: impl FnOnce(&web_sys::IdbObjectStore) -> std::result::Result<web_sys::IdbRequest, JsValue>,
    ) -> Result<JsValue> {
        let (tx, object_store) = idb::begin_transaction(&self.db, store, IdbTransactionMode::Readonly)?;
        let req = request(&object_store)?;
        let result = idb::await_request(&req).await?;
        idb::await_transaction(&tx).await?;
        Ok(result)
    }

    async fn write(
        &self,
        store: &str,
        request: impl FnOnce(&web_sys::IdbObjectStore) -> std::result::Result<web_sys::IdbRequest, JsValue>,
    ) -> Result<JsValue> {
        let (tx, object_store) = idb::begin_transaction(&self.db, store, IdbTransactionMode::Readwrite)?;
        let req = request(&object_store)?;
        let result = idb::await_request(&req).await?;
        idb::await_transaction(&tx).await?;
        Ok(result)
    }

    async fn key_exists(&self, store: &StoreSchema, key: &Key) -> Result<bool> {
        let key_js = key_to_js(key);
        let count = self.read(&store.name, |s| s.count_with_key(&key_js)).await?;
        Ok(count.as_f64().unwrap_or(0.0) > 0.0)
    }

    /// Fail with `DuplicateKey`/`Constraint` if writing `record` would clash.
    async fn check_conflicts(
        &self,
        store: &StoreSchema,
        record: &Record,
        key: Option<&Key>,
        check_key: bool,
    ) -> Result<()> {
        if let (true, Some(key)) = (check_key, key) {
            if self.key_exists(store, key).await? {
                return Err(StoreError::DuplicateKey {
                    store: store.name.clone(),
                    key: key.clone(),
                }
                .into());
            }
        }

        for index in store.unique_indexes() {
            let Some(value) = resolve_path(record, &index.field).filter(|v| is_indexable(v)) else {
                continue;
            };
            let value_js = value_to_js(value)?;
            let holders = self
                .read(&store.name, |s| s.index(&index.name)?.get_all_keys_with_key(&value_js))
                .await?;
            let holders = js_to_keys(&holders)?;
            if holders.iter().any(|holder| Some(holder) != key) {
                return Err(StoreError::Constraint {
                    store: store.name.clone(),
                    index: index.name.clone(),
                }
                .into());
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for IndexedDbConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexedDbConnection")
            .field("database", &self.db.name())
            .field("version", &self.db.version())
            .finish()
    }
}

/// Convert a record to a plain JS object.
fn record_to_js(record: &Record) -> Result<JsValue> {
    let serializer = serde_wasm_bindgen::Serializer::json_compatible();
    Ok(record.serialize(&serializer)?)
}

fn js_to_record(val: JsValue) -> Result<Record> {
    Ok(serde_wasm_bindgen::from_value(val)?)
}

fn js_to_records(val: JsValue) -> Result<Vec<Record>> {
    Ok(serde_wasm_bindgen::from_value(val)?)
}

fn value_to_js(value: &Value) -> Result<JsValue> {
    let serializer = serde_wasm_bindgen::Serializer::json_compatible();
    Ok(value.serialize(&serializer)?)
}

fn key_to_js(key: &Key) -> JsValue {
    match key {
        Key::Int(i) => JsValue::from_f64(*i as f64),
        Key::Text(s) => JsValue::from_str(s),
    }
}

fn js_to_key(val: &JsValue) -> Result<Key> {
    if let Some(s) = val.as_string() {
        return Ok(Key::Text(s));
    }
    match val.as_f64() {
        Some(f) if f.fract() == 0.0 => Ok(Key::Int(f as i64)),
        _ => Err(StoreError::InvalidKey(format!("unsupported IndexedDB key {:?}", val)).into()),
    }
}

fn js_to_keys(val: &JsValue) -> Result<Vec<Key>> {
    js_sys::Array::from(val).iter().map(|k| js_to_key(&k)).collect()
}

/// A failed write may still be a constraint error raised by the engine itself.
/// `taken` is the key only when it is known to be held by another record;
/// otherwise the clash is blamed on the first unique index.
fn classify_write_error(err: IndexedDbError, store: &StoreSchema, taken: Option<&Key>) -> StoreError {
    if err.dom_name() != Some("ConstraintError") {
        return err.into();
    }
    match (taken, store.unique_indexes().next()) {
        (Some(key), _) => StoreError::DuplicateKey {
            store: store.name.clone(),
            key: key.clone(),
        },
        (None, Some(index)) => StoreError::Constraint {
            store: store.name.clone(),
            index: index.name.clone(),
        },
        (None, None) => err.into(),
    }
}

#[async_trait(?Send)]
impl Connection for IndexedDbConnection {
    async fn get(&self, store: &StoreSchema, key: &Key) -> StoreResult<Option<Record>> {
        let key_js = key_to_js(key);
        let result = self.read(&store.name, |s| s.get(&key_js)).await?;
        if result.is_undefined() || result.is_null() {
            return Ok(None);
        }
        Ok(Some(js_to_record(result)?))
    }

    async fn get_all(&self, store: &StoreSchema) -> StoreResult<Vec<Record>> {
        let result = self.read(&store.name, |s| s.get_all()).await?;
        Ok(js_to_records(result)?)
    }

    async fn get_by_index(
        &self,
        store: &StoreSchema,
        index: &IndexSchema,
        value: &Value,
    ) -> StoreResult<Vec<Record>> {
        let value_js = value_to_js(value)?;
        let result = self
            .read(&store.name, |s| s.index(&index.name)?.get_all_with_key(&value_js))
            .await?;
        Ok(js_to_records(result)?)
    }

    async fn add(&self, store: &StoreSchema, record: Record) -> StoreResult<Key> {
        let explicit = key_of(&record, &store.key_path)?;
        self.check_conflicts(store, &record, explicit.as_ref(), true).await?;

        let record_js = record_to_js(&record)?;
        let result = match self.write(&store.name, |s| s.add(&record_js)).await {
            Ok(result) => result,
            Err(e) => {
                // Lost a race with another writer: find out whether the key or an index clashed
                let taken = match explicit.as_ref() {
                    Some(key) if e.dom_name() == Some("ConstraintError") => {
                        self.key_exists(store, key).await?.then_some(key)
                    }
                    _ => None,
                };
                return Err(classify_write_error(e, store, taken));
            }
        };
        let key = js_to_key(&result)?;
        debug!(store = %store.name, key = %key, "⊔ indexeddb add");
        Ok(key)
    }

    async fn put(&self, store: &StoreSchema, record: Record) -> StoreResult<Key> {
        let explicit = key_of(&record, &store.key_path)?;
        self.check_conflicts(store, &record, explicit.as_ref(), false).await?;

        let record_js = record_to_js(&record)?;
        let result = self
            .write(&store.name, |s| s.put(&record_js))
            .await
            .map_err(|e| classify_write_error(e, store, None))?;
        let key = js_to_key(&result)?;
        debug!(store = %store.name, key = %key, "⊔ indexeddb put");
        Ok(key)
    }

    async fn delete(&self, store: &StoreSchema, key: &Key) -> StoreResult<()> {
        let key_js = key_to_js(key);
        self.write(&store.name, |s| s.delete(&key_js)).await?;
        Ok(())
    }

    async fn keys(&self, store: &StoreSchema) -> StoreResult<Vec<Key>> {
        let result = self.read(&store.name, |s| s.get_all_keys()).await?;
        Ok(js_to_keys(&result)?)
    }

    async fn count(&self, store: &StoreSchema) -> StoreResult<usize> {
        let result = self.read(&store.name, |s| s.count()).await?;
        Ok(result.as_f64().unwrap_or(0.0) as usize)
    }

    async fn clear(&self, store: &StoreSchema) -> StoreResult<()> {
        self.write(&store.name, |s| s.clear()).await?;
        Ok(())
    }

    fn close(&self) {
        self.db.set_onversionchange(None);
        self.db.close();
    }
}
