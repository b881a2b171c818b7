//! In-memory storage engine
//!
//! A HashMap-backed engine that behaves like the browser's object store:
//! databases remember their version between opens, stores are only created
//! by the upgrade handshake, each auto-increment store has a key generator
//! that never hands out the same key twice, and iteration is in key order.
//!
//! Useful for:
//! - Unit and integration testing (including simulated engine failure)
//! - Native processes that want the primary-engine code path without disk

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::engine::{Connection, Engine};
use crate::error::{StoreError, StoreResult};
use crate::record::{field_matches, key_of, set_path, unique_violation, Key, Record};
use crate::schema::{DatabaseSchema, IndexSchema, StoreSchema};

/// One physical store.
#[derive(Debug)]
struct MemoryTable {
    key_path: String,
    auto_increment: bool,
    indexes: Vec<IndexSchema>,
    records: BTreeMap<Key, Record>,
    next_key: i64,
}

impl MemoryTable {
    fn new(schema: &StoreSchema) -> Self {
        Self {
            key_path: schema.key_path.clone(),
            auto_increment: schema.auto_increment,
            indexes: Vec::new(),
            records: BTreeMap::new(),
            next_key: 1,
        }
    }

    fn as_schema(&self, name: &str) -> StoreSchema {
        StoreSchema {
            name: name.to_string(),
            key_path: self.key_path.clone(),
            auto_increment: self.auto_increment,
            indexes: self.indexes.clone(),
        }
    }

    /// Resolve the key of a record about to be written, running the key
    /// generator when needed.
    fn resolve_key(&mut self, store: &str, record: &mut Record) -> StoreResult<Key> {
        match key_of(record, &self.key_path)? {
            Some(key) => {
                if self.auto_increment {
                    if let Key::Int(i) = key {
                        self.next_key = self.next_key.max(i.saturating_add(1));
                    }
                }
                Ok(key)
            }
            None if self.auto_increment => {
                let key = self.next_key;
                self.next_key = key
                    .checked_add(1)
                    .ok_or_else(|| StoreError::Transaction("key generator exhausted".into()))?;
                set_path(record, &self.key_path, Value::from(key))?;
                Ok(Key::Int(key))
            }
            None => Err(StoreError::InvalidKey(format!(
                "record has no '{}' and store '{}' does not auto-increment",
                self.key_path, store
            ))),
        }
    }

    /// Run a write; a failed write leaves the key generator where it was.
    fn write(&mut self, op: impl FnOnce(&mut Self) -> StoreResult<Key>) -> StoreResult<Key> {
        let next_key = self.next_key;
        let result = op(self);
        if result.is_err() {
            self.next_key = next_key;
        }
        result
    }

    fn check_unique(&self, store: &str, record: &Record, key: &Key) -> StoreResult<()> {
        let schema = self.as_schema(store);
        let others: Vec<&Record> = self.records.values().collect();
        match unique_violation(&schema, record, key, &others) {
            Some(index) => Err(StoreError::Constraint {
                store: store.to_string(),
                index: index.name.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// One named database.
#[derive(Debug, Default)]
struct MemoryDatabase {
    version: u32,
    tables: HashMap<String, MemoryTable>,
}

impl MemoryDatabase {
    /// Create missing stores and indexes. Safe to run against a partial schema.
    fn upgrade(&mut self, schema: &DatabaseSchema) {
        for store in &schema.stores {
            let table = self
                .tables
                .entry(store.name.clone())
                .or_insert_with(|| MemoryTable::new(store));
            for index in &store.indexes {
                if !table.indexes.iter().any(|i| i.name == index.name) {
                    table.indexes.push(index.clone());
                }
            }
        }
        self.version = schema.version;
    }
}

/// In-memory engine.
///
/// Clones share the same set of databases, so a second `LocalStore` built from
/// a clone sees what the first one wrote, the way two page loads see the same
/// browser profile.
#[derive(Debug, Clone, Default)]
pub struct MemoryEngine {
    databases: Arc<Mutex<HashMap<String, Arc<Mutex<MemoryDatabase>>>>>,
    open_attempts: Arc<AtomicUsize>,
    unavailable: Option<String>,
}

impl MemoryEngine {
    /// Create a new engine with no databases.
    pub fn new() -> Self {
        Self::default()
    }

    /// An engine whose every open fails, as when the browser has no IndexedDB.
    pub fn unavailable() -> Self {
        Self {
            unavailable: Some("memory engine disabled".to_string()),
            ..Self::default()
        }
    }

    /// Number of `open` calls made against this engine (shared by clones).
    pub fn open_attempts(&self) -> usize {
        self.open_attempts.load(Ordering::SeqCst)
    }

    /// Persisted version of a database, if it exists.
    pub fn version(&self, database: &str) -> Option<u32> {
        self.databases
            .lock()
            .get(database)
            .map(|db| db.lock().version)
    }

    /// Names of the physical stores of a database, sorted.
    pub fn store_names(&self, database: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .databases
            .lock()
            .get(database)
            .map(|db| db.lock().tables.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl Engine for MemoryEngine {
    type Connection = MemoryConnection;

    fn name(&self) -> &'static str {
        "memory"
    }

    async fn open(&self, schema: &DatabaseSchema) -> StoreResult<MemoryConnection> {
        self.open_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = &self.unavailable {
            return Err(StoreError::EngineUnavailable(reason.clone()));
        }

        let database = self
            .databases
            .lock()
            .entry(schema.name.clone())
            .or_default()
            .clone();

        {
            let mut db = database.lock();
            if db.version > schema.version {
                return Err(StoreError::EngineUnavailable(format!(
                    "database '{}' is at version {}, cannot open at {}",
                    schema.name, db.version, schema.version
                )));
            }
            if db.version < schema.version {
                debug!(db = %schema.name, from = db.version, to = schema.version, "⊔ memory upgrade");
                db.upgrade(schema);
            }
        }

        Ok(MemoryConnection { database })
    }
}

/// Handle to one in-memory database.
#[derive(Debug, Clone)]
pub struct MemoryConnection {
    database: Arc<Mutex<MemoryDatabase>>,
}

impl MemoryConnection {
    fn with_table<T>(
        &self,
        store: &StoreSchema,
        f: impl FnOnce(&mut MemoryTable) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut db = self.database.lock();
        let table = db.tables.get_mut(&store.name).ok_or_else(|| {
            StoreError::SchemaMismatch(format!("store '{}' does not exist in the engine", store.name))
        })?;
        f(table)
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl Connection for MemoryConnection {
    async fn get(&self, store: &StoreSchema, key: &Key) -> StoreResult<Option<Record>> {
        self.with_table(store, |table| Ok(table.records.get(key).cloned()))
    }

    async fn get_all(&self, store: &StoreSchema) -> StoreResult<Vec<Record>> {
        self.with_table(store, |table| Ok(table.records.values().cloned().collect()))
    }

    async fn get_by_index(
        &self,
        store: &StoreSchema,
        index: &IndexSchema,
        value: &Value,
    ) -> StoreResult<Vec<Record>> {
        self.with_table(store, |table| {
            let physical = table
                .indexes
                .iter()
                .find(|i| i.name == index.name)
                .ok_or_else(|| {
                    StoreError::SchemaMismatch(format!(
                        "index '{}' does not exist on store '{}'",
                        index.name, store.name
                    ))
                })?;
            Ok(table
                .records
                .values()
                .filter(|r| field_matches(r, &physical.field, value))
                .cloned()
                .collect())
        })
    }

    async fn add(&self, store: &StoreSchema, mut record: Record) -> StoreResult<Key> {
        self.with_table(store, |table| {
            table.write(|table| {
                let key = table.resolve_key(&store.name, &mut record)?;
                if table.records.contains_key(&key) {
                    return Err(StoreError::DuplicateKey {
                        store: store.name.clone(),
                        key,
                    });
                }
                table.check_unique(&store.name, &record, &key)?;
                table.records.insert(key.clone(), record);
                Ok(key)
            })
        })
    }

    async fn put(&self, store: &StoreSchema, mut record: Record) -> StoreResult<Key> {
        self.with_table(store, |table| {
            table.write(|table| {
                let key = table.resolve_key(&store.name, &mut record)?;
                table.check_unique(&store.name, &record, &key)?;
                table.records.insert(key.clone(), record);
                Ok(key)
            })
        })
    }

    async fn delete(&self, store: &StoreSchema, key: &Key) -> StoreResult<()> {
        self.with_table(store, |table| {
            table.records.remove(key);
            Ok(())
        })
    }

    async fn keys(&self, store: &StoreSchema) -> StoreResult<Vec<Key>> {
        self.with_table(store, |table| Ok(table.records.keys().cloned().collect()))
    }

    async fn count(&self, store: &StoreSchema) -> StoreResult<usize> {
        self.with_table(store, |table| Ok(table.records.len()))
    }

    async fn clear(&self, store: &StoreSchema) -> StoreResult<()> {
        self.with_table(store, |table| {
            table.records.clear();
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::record_from_value;
    use serde_json::json;

    fn record(value: Value) -> Record {
        record_from_value(value).unwrap()
    }

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(future)
    }

    fn schema(version: u32) -> DatabaseSchema {
        DatabaseSchema::new("ledger", version).store(
            StoreSchema::new("entries", "id")
                .auto_increment()
                .index("companyId", "companyId"),
        )
    }

    #[test]
    fn test_open_creates_stores_and_records_version() {
        let engine = MemoryEngine::new();
        block_on(engine.open(&schema(1))).unwrap();
        assert_eq!(engine.version("ledger"), Some(1));
        assert_eq!(engine.store_names("ledger"), vec!["entries".to_string()]);
        assert_eq!(engine.open_attempts(), 1);
    }

    #[test]
    fn test_upgrade_adds_missing_stores_and_indexes() {
        let engine = MemoryEngine::new();
        block_on(engine.open(&schema(1))).unwrap();

        let v2 = DatabaseSchema::new("ledger", 2)
            .store(
                StoreSchema::new("entries", "id")
                    .auto_increment()
                    .index("companyId", "companyId")
                    .index("type", "type"),
            )
            .store(StoreSchema::new("companies", "id"));
        let conn = block_on(engine.open(&v2)).unwrap();

        assert_eq!(engine.version("ledger"), Some(2));
        assert_eq!(engine.store_names("ledger"), vec!["companies".to_string(), "entries".to_string()]);

        let entries = v2.store_schema("entries").unwrap();
        let by_type = entries.index_schema("type").unwrap();
        block_on(async {
            conn.add(entries, record(json!({"type": "debit"}))).await.unwrap();
            assert_eq!(conn.get_by_index(entries, by_type, &json!("debit")).await.unwrap().len(), 1);
        });
    }

    #[test]
    fn test_open_at_lower_version_fails() {
        let engine = MemoryEngine::new();
        block_on(engine.open(&schema(3))).unwrap();
        let err = block_on(engine.open(&schema(2))).unwrap_err();
        assert!(matches!(err, StoreError::EngineUnavailable(_)));
    }

    #[test]
    fn test_same_version_does_not_create_new_stores() {
        let engine = MemoryEngine::new();
        block_on(engine.open(&schema(1))).unwrap();

        let drifted = schema(1).store(StoreSchema::new("extra", "id"));
        let conn = block_on(engine.open(&drifted)).unwrap();
        let err = block_on(conn.get_all(drifted.store_schema("extra").unwrap())).unwrap_err();
        assert!(matches!(err, StoreError::SchemaMismatch(_)));
    }

    #[test]
    fn test_key_generator_never_reuses_keys() {
        let engine = MemoryEngine::new();
        let s = schema(1);
        let conn = block_on(engine.open(&s)).unwrap();
        let entries = s.store_schema("entries").unwrap();

        block_on(async {
            let first = conn.add(entries, record(json!({}))).await.unwrap();
            conn.delete(entries, &first).await.unwrap();
            let second = conn.add(entries, record(json!({}))).await.unwrap();
            assert_eq!((first, second.clone()), (Key::Int(1), Key::Int(2)));

            conn.add(entries, record(json!({"id": 40}))).await.unwrap();
            assert_eq!(conn.add(entries, record(json!({}))).await.unwrap(), Key::Int(41));
        });
    }

    #[test]
    fn test_failed_add_keeps_key_generator() {
        let engine = MemoryEngine::new();
        let s = DatabaseSchema::new("ledger", 1).store(
            StoreSchema::new("entries", "id")
                .auto_increment()
                .unique_index("email", "email"),
        );
        let conn = block_on(engine.open(&s)).unwrap();
        let entries = s.store_schema("entries").unwrap();

        block_on(async {
            conn.add(entries, record(json!({"email": "a@x"}))).await.unwrap();
            let err = conn.add(entries, record(json!({"email": "a@x"}))).await.unwrap_err();
            assert!(matches!(err, StoreError::Constraint { .. }));
            assert_eq!(conn.add(entries, record(json!({"email": "b@x"}))).await.unwrap(), Key::Int(2));
        });
    }

    #[test]
    fn test_unavailable_counts_attempts() {
        let engine = MemoryEngine::unavailable();
        assert!(block_on(engine.open(&schema(1))).is_err());
        assert_eq!(engine.open_attempts(), 1);
        assert_eq!(engine.version("ledger"), None);
    }
}
