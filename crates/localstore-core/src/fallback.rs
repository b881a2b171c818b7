//! Record operations on top of a flat key/value namespace.
//!
//! Each store lives in one entry named `{database}:{store}` holding a JSON
//! array of all its records. The key/value engine has no per-record
//! addressing and no indexes, so every lookup, uniqueness check and index
//! query scans that array.
//!
//! Ordering is insertion order; `put` over an existing key replaces the record
//! in place.
//!
//! Auto-increment stores keep their key generator in a second entry,
//! `{database}:{store}:next`, so a deleted key is never handed out again.
//! Explicit integer keys push the generator past them, and `clear` leaves it
//! alone, the same as the browser engine's generator.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::engine::Connection;
use crate::error::{StoreError, StoreResult};
use crate::kv::KeyValueStore;
use crate::record::{field_matches, key_of, set_path, unique_violation, Key, Record};
use crate::schema::{IndexSchema, StoreSchema};

/// Fallback connection backed by a [`KeyValueStore`].
#[derive(Debug, Clone)]
pub struct FallbackStore<K> {
    kv: K,
    database: String,
}

impl<K: KeyValueStore> FallbackStore<K> {
    /// Records of `database` will be namespaced under `{database}:`.
    pub fn new(kv: K, database: impl Into<String>) -> Self {
        Self {
            kv,
            database: database.into(),
        }
    }

    /// Name of the key/value entry holding `store`.
    pub fn entry_name(&self, store: &str) -> String {
        format!("{}:{}", self.database, store)
    }

    /// The underlying key/value namespace.
    pub fn kv(&self) -> &K {
        &self.kv
    }

    fn load(&self, store: &StoreSchema) -> StoreResult<Vec<Record>> {
        let entry = self.entry_name(&store.name);
        let Some(raw) = self.kv.get_item(&entry)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str::<Vec<Record>>(&raw) {
            Ok(records) => Ok(records),
            Err(e) => {
                warn!(entry = %entry, error = %e, "⊔ fallback entry is not a record array, reading as empty");
                Ok(Vec::new())
            }
        }
    }

    fn save(&self, store: &StoreSchema, records: &[Record]) -> StoreResult<()> {
        let raw = serde_json::to_string(records)?;
        self.kv.set_item(&self.entry_name(&store.name), &raw)
    }

    fn position(store: &StoreSchema, records: &[Record], key: &Key) -> Option<usize> {
        records
            .iter()
            .position(|r| key_of(r, &store.key_path).ok().flatten().as_ref() == Some(key))
    }

    /// Name of the key/value entry holding `store`'s key generator.
    ///
    /// Store names cannot contain `:`, so this never collides with a store entry.
    pub fn generator_name(&self, store: &str) -> String {
        format!("{}:{}:next", self.database, store)
    }

    /// Next key the generator would hand out.
    ///
    /// Never below one past the largest integer key stored, so a missing or
    /// unreadable generator entry cannot lead to a reused key.
    fn generator(&self, store: &StoreSchema, records: &[Record]) -> StoreResult<i64> {
        let entry = self.generator_name(&store.name);
        let stored = match self.kv.get_item(&entry)? {
            Some(raw) => match raw.trim().parse::<i64>() {
                Ok(next) => next,
                Err(e) => {
                    warn!(entry = %entry, error = %e, "⊔ fallback key generator unreadable, rebuilding from records");
                    1
                }
            },
            None => 1,
        };
        let floor = records
            .iter()
            .filter_map(|r| key_of(r, &store.key_path).ok().flatten())
            .filter_map(|k| k.as_int())
            .max()
            .map_or(1, |max| max.saturating_add(1));
        Ok(stored.max(floor))
    }

    /// Resolve the record's key, running the key generator for auto-increment
    /// stores. Also returns the generator value to persist once the write lands.
    fn resolve_key(
        &self,
        store: &StoreSchema,
        records: &[Record],
        record: &mut Record,
    ) -> StoreResult<(Key, Option<i64>)> {
        let explicit = key_of(record, &store.key_path)?;
        if !store.auto_increment {
            return match explicit {
                Some(key) => Ok((key, None)),
                None => Err(StoreError::InvalidKey(format!(
                    "record has no '{}' and store '{}' does not auto-increment",
                    store.key_path, store.name
                ))),
            };
        }

        let next = self.generator(store, records)?;
        match explicit {
            Some(Key::Int(i)) => Ok((Key::Int(i), Some(next.max(i.saturating_add(1))))),
            Some(key) => Ok((key, Some(next))),
            None => {
                let after = next
                    .checked_add(1)
                    .ok_or_else(|| StoreError::Transaction("key generator exhausted".into()))?;
                set_path(record, &store.key_path, Value::from(next))?;
                Ok((Key::Int(next), Some(after)))
            }
        }
    }

    fn save_generator(&self, store: &StoreSchema, next: Option<i64>) -> StoreResult<()> {
        match next {
            Some(next) => self
                .kv
                .set_item(&self.generator_name(&store.name), &next.to_string()),
            None => Ok(()),
        }
    }

    fn check_unique(store: &StoreSchema, records: &[Record], record: &Record, key: &Key) -> StoreResult<()> {
        let others: Vec<&Record> = records.iter().collect();
        match unique_violation(store, record, key, &others) {
            Some(index) => Err(StoreError::Constraint {
                store: store.name.clone(),
                index: index.name.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl<K: KeyValueStore> Connection for FallbackStore<K> {
    async fn get(&self, store: &StoreSchema, key: &Key) -> StoreResult<Option<Record>> {
        let mut records = self.load(store)?;
        Ok(Self::position(store, &records, key).map(|i| records.swap_remove(i)))
    }

    async fn get_all(&self, store: &StoreSchema) -> StoreResult<Vec<Record>> {
        self.load(store)
    }

    async fn get_by_index(
        &self,
        store: &StoreSchema,
        index: &IndexSchema,
        value: &Value,
    ) -> StoreResult<Vec<Record>> {
        let records = self.load(store)?;
        Ok(records
            .into_iter()
            .filter(|r| field_matches(r, &index.field, value))
            .collect())
    }

    async fn add(&self, store: &StoreSchema, mut record: Record) -> StoreResult<Key> {
        let mut records = self.load(store)?;
        let (key, next) = self.resolve_key(store, &records, &mut record)?;
        if Self::position(store, &records, &key).is_some() {
            return Err(StoreError::DuplicateKey {
                store: store.name.clone(),
                key,
            });
        }
        Self::check_unique(store, &records, &record, &key)?;

        records.push(record);
        self.save(store, &records)?;
        self.save_generator(store, next)?;
        debug!(store = %store.name, key = %key, "⊔ fallback add");
        Ok(key)
    }

    async fn put(&self, store: &StoreSchema, mut record: Record) -> StoreResult<Key> {
        let mut records = self.load(store)?;
        let (key, next) = self.resolve_key(store, &records, &mut record)?;
        Self::check_unique(store, &records, &record, &key)?;

        match Self::position(store, &records, &key) {
            Some(i) => records[i] = record,
            None => records.push(record),
        }
        self.save(store, &records)?;
        self.save_generator(store, next)?;
        debug!(store = %store.name, key = %key, "⊔ fallback put");
        Ok(key)
    }

    async fn delete(&self, store: &StoreSchema, key: &Key) -> StoreResult<()> {
        let mut records = self.load(store)?;
        if let Some(i) = Self::position(store, &records, key) {
            records.remove(i);
            self.save(store, &records)?;
        }
        Ok(())
    }

    async fn keys(&self, store: &StoreSchema) -> StoreResult<Vec<Key>> {
        let records = self.load(store)?;
        Ok(records
            .iter()
            .filter_map(|r| key_of(r, &store.key_path).ok().flatten())
            .collect())
    }

    /// Drops the records; the key generator keeps counting.
    async fn clear(&self, store: &StoreSchema) -> StoreResult<()> {
        self.kv.remove_item(&self.entry_name(&store.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use crate::record::record_from_value;
    use serde_json::json;

    fn record(value: Value) -> Record {
        record_from_value(value).unwrap()
    }

    fn contacts() -> StoreSchema {
        StoreSchema::new("contacts", "id")
            .auto_increment()
            .index("companyId", "companyId")
            .unique_index("email", "email")
    }

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(future)
    }

    #[test]
    fn test_entry_is_namespaced_json_array() {
        let kv = MemoryKv::new();
        let fallback = FallbackStore::new(kv.clone(), "ContactLedgerDB");
        let store = contacts();

        block_on(fallback.add(&store, record(json!({"name": "A"})))).unwrap();

        assert_eq!(
            kv.item_names(),
            vec!["ContactLedgerDB:contacts".to_string(), "ContactLedgerDB:contacts:next".to_string()]
        );
        let raw = kv.get_item("ContactLedgerDB:contacts").unwrap().unwrap();
        let parsed: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, json!([{"id": 1, "name": "A"}]));
    }

    #[test]
    fn test_auto_increment_bumps_past_explicit_keys() {
        let fallback = FallbackStore::new(MemoryKv::new(), "db");
        let store = contacts();

        block_on(async {
            assert_eq!(fallback.add(&store, record(json!({"name": "a"}))).await.unwrap(), Key::Int(1));
            assert_eq!(fallback.add(&store, record(json!({"id": 10, "name": "b"}))).await.unwrap(), Key::Int(10));
            assert_eq!(fallback.add(&store, record(json!({"name": "c"}))).await.unwrap(), Key::Int(11));
        });
    }

    #[test]
    fn test_deleted_keys_are_not_reused() {
        let kv = MemoryKv::new();
        let fallback = FallbackStore::new(kv.clone(), "db");
        let store = contacts();

        block_on(async {
            fallback.add(&store, record(json!({"name": "a"}))).await.unwrap();
            let b = fallback.add(&store, record(json!({"name": "b"}))).await.unwrap();
            fallback.delete(&store, &b).await.unwrap();
            assert_eq!(fallback.add(&store, record(json!({"name": "c"}))).await.unwrap(), Key::Int(3));

            fallback.clear(&store).await.unwrap();
            assert_eq!(fallback.add(&store, record(json!({"name": "d"}))).await.unwrap(), Key::Int(4));
        });
        assert_eq!(kv.get_item("db:contacts:next").unwrap().as_deref(), Some("5"));
    }

    #[test]
    fn test_generator_never_behind_stored_records() {
        let kv = MemoryKv::new();
        kv.set_item("db:contacts", r#"[{"id": 7}]"#).unwrap();
        kv.set_item("db:contacts:next", "garbage").unwrap();
        let fallback = FallbackStore::new(kv.clone(), "db");

        let key = block_on(fallback.add(&contacts(), record(json!({"name": "x"})))).unwrap();
        assert_eq!(key, Key::Int(8));
    }

    #[test]
    fn test_failed_add_does_not_advance_generator() {
        let kv = MemoryKv::new();
        let fallback = FallbackStore::new(kv.clone(), "db");
        let store = contacts();

        block_on(async {
            fallback.add(&store, record(json!({"email": "a@x"}))).await.unwrap();
            fallback.add(&store, record(json!({"email": "a@x"}))).await.unwrap_err();
            assert_eq!(fallback.add(&store, record(json!({"email": "b@x"}))).await.unwrap(), Key::Int(2));
        });
    }

    #[test]
    fn test_duplicate_and_unique() {
        let fallback = FallbackStore::new(MemoryKv::new(), "db");
        let store = contacts();

        block_on(async {
            fallback.add(&store, record(json!({"id": 1, "email": "a@x"}))).await.unwrap();

            let dup = fallback.add(&store, record(json!({"id": 1}))).await.unwrap_err();
            assert!(matches!(dup, StoreError::DuplicateKey { .. }));

            let clash = fallback.add(&store, record(json!({"id": 2, "email": "a@x"}))).await.unwrap_err();
            assert_eq!(
                clash,
                StoreError::Constraint { store: "contacts".into(), index: "email".into() }
            );

            // Rewriting the owner of the value is fine.
            fallback.put(&store, record(json!({"id": 1, "email": "a@x", "n": 2}))).await.unwrap();
            assert_eq!(fallback.count(&store).await.unwrap(), 1);
        });
    }

    #[test]
    fn test_put_replaces_in_place() {
        let fallback = FallbackStore::new(MemoryKv::new(), "db");
        let store = StoreSchema::new("s", "id");

        block_on(async {
            for id in ["a", "b", "c"] {
                fallback.put(&store, record(json!({"id": id, "v": 0}))).await.unwrap();
            }
            fallback.put(&store, record(json!({"id": "b", "v": 1}))).await.unwrap();
            let keys = fallback.keys(&store).await.unwrap();
            assert_eq!(keys, vec![Key::from("a"), Key::from("b"), Key::from("c")]);
            let b = fallback.get(&store, &Key::from("b")).await.unwrap().unwrap();
            assert_eq!(b.get("v"), Some(&json!(1)));
        });
    }

    #[test]
    fn test_corrupt_entry_reads_empty() {
        let kv = MemoryKv::new();
        kv.set_item("db:s", "{not json").unwrap();
        let fallback = FallbackStore::new(kv.clone(), "db");
        let store = StoreSchema::new("s", "id");

        block_on(async {
            assert!(fallback.get_all(&store).await.unwrap().is_empty());
            fallback.add(&store, record(json!({"id": 1}))).await.unwrap();
            assert_eq!(fallback.get_all(&store).await.unwrap().len(), 1);
        });
    }

    #[test]
    fn test_delete_absent_does_not_write() {
        let kv = MemoryKv::new();
        let fallback = FallbackStore::new(kv.clone(), "db");
        let store = StoreSchema::new("s", "id");

        block_on(fallback.delete(&store, &Key::Int(9))).unwrap();
        assert!(kv.is_empty());
    }

    #[test]
    fn test_get_by_index_scans() {
        let fallback = FallbackStore::new(MemoryKv::new(), "db");
        let store = contacts();
        let index = store.index_schema("companyId").unwrap().clone();

        block_on(async {
            fallback.add(&store, record(json!({"companyId": 5}))).await.unwrap();
            fallback.add(&store, record(json!({"companyId": 6}))).await.unwrap();
            fallback.add(&store, record(json!({"companyId": 5.0}))).await.unwrap();
            let hits = fallback.get_by_index(&store, &index, &json!(5)).await.unwrap();
            assert_eq!(hits.len(), 2);
        });
    }
}
