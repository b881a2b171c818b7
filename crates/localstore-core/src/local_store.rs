//! The lifecycle-managed local store.
//!
//! `LocalStore` owns one primary [`Engine`] and one [`KeyValueStore`]
//! fallback for a single declared database. Initialization runs at most once
//! per instance: concurrent callers share the same in-flight open, and every
//! record operation triggers (or awaits) it first, so callers never have to
//! sequence `init()` themselves.
//!
//! If the primary engine fails to open, the instance is degraded for the rest
//! of its life and every operation is served from the fallback namespace. It
//! never retries the primary engine; build a new instance to do that. The
//! same holds when the future driving the first open is dropped before the
//! engine answers: the next caller does not reopen, it finds the instance
//! degraded (or unavailable in `PrimaryOnly` mode).
//!
//! Writes to the same store are not serialized here. A caller that needs
//! "write, then read back" ordering must await each step. There is no
//! cross-process lock either, so two processes (or tabs) sharing a fallback
//! namespace can overwrite each other's read-modify-write of a store entry.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::engine::{Connection, Engine};
use crate::error::{StoreError, StoreResult};
use crate::fallback::FallbackStore;
use crate::kv::KeyValueStore;
use crate::record::{
    is_indexable, key_of, now_timestamp, set_path, stamp_created, stamp_updated, Key, Record,
};
use crate::schema::{DatabaseSchema, IndexSchema, StoreSchema, DOCUMENT_VALUE_FIELD};
use crate::snapshot::{Snapshot, StorageStats};

/// Key of the single record held by a document store.
pub const DOCUMENT_KEY: &str = "document";

/// Which engines a store may use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineMode {
    /// Primary engine, falling back to the key/value store if it cannot open
    #[default]
    Auto,
    /// Primary engine only; if it cannot open, operations fail with `EngineUnavailable`
    PrimaryOnly,
    /// Never open the primary engine
    FallbackOnly,
}

impl fmt::Display for EngineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineMode::Auto => "auto",
            EngineMode::PrimaryOnly => "primary-only",
            EngineMode::FallbackOnly => "fallback-only",
        };
        f.write_str(name)
    }
}

/// Outcome of initialization, observable through [`LocalStore::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendStatus {
    /// Primary engine open
    Ready,
    /// Serving from the fallback store
    Degraded,
    /// Primary engine failed in `PrimaryOnly` mode
    Unavailable,
}

enum Backend<C> {
    Primary(C),
    Degraded { reason: String },
    Unavailable { reason: String },
}

/// Builder for [`LocalStore`].
#[derive(Debug, Clone)]
pub struct LocalStoreBuilder {
    schema: DatabaseSchema,
    mode: EngineMode,
}

impl LocalStoreBuilder {
    pub fn new(schema: DatabaseSchema) -> Self {
        Self {
            schema,
            mode: EngineMode::default(),
        }
    }

    /// Engine selection (default `Auto`).
    pub fn mode(mut self, mode: EngineMode) -> Self {
        self.mode = mode;
        self
    }

    /// Validate the schema and build the store. Nothing is opened yet.
    pub fn build<E: Engine, K: KeyValueStore>(
        self,
        engine: E,
        kv: K,
    ) -> StoreResult<LocalStore<E, K>> {
        self.schema.validate()?;
        let fallback = FallbackStore::new(kv, self.schema.name.clone());
        Ok(LocalStore {
            schema: self.schema,
            mode: self.mode,
            engine,
            fallback,
            backend: OnceCell::new(),
            open_started: AtomicBool::new(false),
        })
    }
}

/// Local key/object store over one database.
///
/// All methods take `&self`; share it behind an `Arc` (or `Rc` in the browser).
pub struct LocalStore<E: Engine, K: KeyValueStore> {
    schema: DatabaseSchema,
    mode: EngineMode,
    engine: E,
    fallback: FallbackStore<K>,
    backend: OnceCell<Backend<E::Connection>>,
    open_started: AtomicBool,
}

impl<E: Engine, K: KeyValueStore> LocalStore<E, K> {
    /// Start building a store for `schema`.
    pub fn builder(schema: DatabaseSchema) -> LocalStoreBuilder {
        LocalStoreBuilder::new(schema)
    }

    /// Build a store in `Auto` mode.
    pub fn new(schema: DatabaseSchema, engine: E, kv: K) -> StoreResult<Self> {
        LocalStoreBuilder::new(schema).build(engine, kv)
    }

    /// The declared schema.
    pub fn schema(&self) -> &DatabaseSchema {
        &self.schema
    }

    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    /// The primary engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// The fallback store (for inspection; operations route automatically).
    pub fn fallback(&self) -> &FallbackStore<K> {
        &self.fallback
    }

    // ========================================================================
    // Initialization
    // ========================================================================

    /// Open the database. Idempotent, single-flight, and never fails.
    ///
    /// The primary engine is asked to open at most once. If the caller that
    /// started the open drops its future before it finishes, later callers
    /// get a degraded (or unavailable) store instead of a second open.
    ///
    /// The outcome is reported by [`status`](Self::status) and
    /// [`is_degraded`](Self::is_degraded), not by this call.
    pub async fn init(&self) {
        self.backend().await;
    }

    /// `None` until initialization has finished.
    pub fn status(&self) -> Option<BackendStatus> {
        self.backend.get().map(|backend| match backend {
            Backend::Primary(_) => BackendStatus::Ready,
            Backend::Degraded { .. } => BackendStatus::Degraded,
            Backend::Unavailable { .. } => BackendStatus::Unavailable,
        })
    }

    /// Whether operations are being served by the fallback store.
    pub fn is_degraded(&self) -> bool {
        self.status() == Some(BackendStatus::Degraded)
    }

    /// Why the primary engine is not in use, if it is not.
    pub fn degraded_reason(&self) -> Option<&str> {
        match self.backend.get()? {
            Backend::Primary(_) => None,
            Backend::Degraded { reason } | Backend::Unavailable { reason } => Some(reason),
        }
    }

    async fn backend(&self) -> &Backend<E::Connection> {
        self.backend.get_or_init(|| self.open_backend()).await
    }

    async fn open_backend(&self) -> Backend<E::Connection> {
        let db = &self.schema.name;
        if self.mode == EngineMode::FallbackOnly {
            info!(db = %db, "⊔ fallback-only mode, primary engine not opened");
            return Backend::Degraded {
                reason: "fallback-only mode".to_string(),
            };
        }

        if self.open_started.swap(true, Ordering::SeqCst) {
            let reason = "initialization was cancelled before the primary engine opened".to_string();
            warn!(db = %db, engine = self.engine.name(), "⊔ {}", reason);
            return match self.mode {
                EngineMode::PrimaryOnly => Backend::Unavailable { reason },
                _ => Backend::Degraded { reason },
            };
        }

        match self.engine.open(&self.schema).await {
            Ok(conn) => {
                info!(db = %db, engine = self.engine.name(), version = self.schema.version, "⊔ database ready");
                Backend::Primary(conn)
            }
            Err(e) if self.mode == EngineMode::Auto => {
                warn!(db = %db, engine = self.engine.name(), error = %e, "⊔ primary engine failed, degrading to fallback store");
                Backend::Degraded {
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                warn!(db = %db, engine = self.engine.name(), error = %e, "⊔ primary engine failed in primary-only mode");
                Backend::Unavailable {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn connection(&self) -> StoreResult<&dyn Connection> {
        match self.backend().await {
            Backend::Primary(conn) => Ok(conn),
            Backend::Degraded { .. } => Ok(&self.fallback),
            Backend::Unavailable { reason } => Err(StoreError::EngineUnavailable(reason.clone())),
        }
    }

    fn engine_name(&self) -> &'static str {
        match self.backend.get() {
            Some(Backend::Primary(_)) => self.engine.name(),
            Some(Backend::Degraded { .. }) => "fallback",
            _ => "none",
        }
    }

    // ========================================================================
    // Schema lookups
    // ========================================================================

    fn store_schema(&self, store: &str) -> StoreResult<&StoreSchema> {
        self.schema.store_schema(store).ok_or_else(|| {
            StoreError::SchemaMismatch(format!(
                "store '{}' is not declared in database '{}'",
                store, self.schema.name
            ))
        })
    }

    fn index_schema<'a>(&self, store: &'a StoreSchema, index: &str) -> StoreResult<&'a IndexSchema> {
        store.index_schema(index).ok_or_else(|| {
            StoreError::SchemaMismatch(format!(
                "index '{}' is not declared on store '{}'",
                index, store.name
            ))
        })
    }

    // ========================================================================
    // CRUD
    // ========================================================================

    /// Retrieve a record by key. Returns `None` if not found.
    ///
    /// A stored record that happens to be empty is still `Some`.
    pub async fn get(&self, store: &str, key: impl Into<Key>) -> StoreResult<Option<Record>> {
        let schema = self.store_schema(store)?;
        let key = key.into();
        let record = self.connection().await?.get(schema, &key).await?;
        debug!(store = store, key = %key, found = record.is_some(), "⊔ get");
        Ok(record)
    }

    /// Every record in the store. Empty, never absent, when there are none.
    ///
    /// Order is the serving engine's: key order for primary engines, insertion
    /// order for the fallback store.
    pub async fn get_all(&self, store: &str) -> StoreResult<Vec<Record>> {
        let schema = self.store_schema(store)?;
        self.connection().await?.get_all(schema).await
    }

    /// Records whose indexed field equals `value`.
    ///
    /// `value` must be a number or a string.
    pub async fn get_by_index(
        &self,
        store: &str,
        index: &str,
        value: impl Into<Value>,
    ) -> StoreResult<Vec<Record>> {
        let schema = self.store_schema(store)?;
        let index = self.index_schema(schema, index)?;
        let value = value.into();
        if !is_indexable(&value) {
            return Err(StoreError::InvalidKey(format!(
                "{} cannot be looked up in index '{}'",
                value, index.name
            )));
        }
        let records = self.connection().await?.get_by_index(schema, index, &value).await?;
        debug!(store = store, index = %index.name, hits = records.len(), "⊔ get_by_index");
        Ok(records)
    }

    /// Insert a new record, stamping `createdAt` and `updatedAt`.
    ///
    /// Auto-increment stores assign the key when the record has none. Returns
    /// the record's key, or `StoreError::DuplicateKey` if it is already taken.
    pub async fn add(&self, store: &str, mut record: Record) -> StoreResult<Key> {
        let schema = self.store_schema(store)?;
        if key_of(&record, &schema.key_path)?.is_none() && !schema.auto_increment {
            return Err(StoreError::InvalidKey(format!(
                "record for '{}' is missing its key '{}'",
                store, schema.key_path
            )));
        }

        stamp_created(&mut record);
        let key = self.connection().await?.add(schema, record).await?;
        debug!(store = store, key = %key, "⊔ add");
        Ok(key)
    }

    /// Insert or replace a record by its key, stamping a fresh `updatedAt`.
    ///
    /// The record must carry its key. `createdAt` is left as the caller passes it.
    pub async fn update(&self, store: &str, mut record: Record) -> StoreResult<()> {
        let schema = self.store_schema(store)?;
        let key = key_of(&record, &schema.key_path)?.ok_or_else(|| {
            StoreError::InvalidKey(format!(
                "record for '{}' is missing its key '{}'",
                store, schema.key_path
            ))
        })?;

        stamp_updated(&mut record);
        self.connection().await?.put(schema, record).await?;
        debug!(store = store, key = %key, "⊔ update");
        Ok(())
    }

    /// Remove a record. Deleting an absent key succeeds.
    pub async fn delete(&self, store: &str, key: impl Into<Key>) -> StoreResult<()> {
        let schema = self.store_schema(store)?;
        let key = key.into();
        self.connection().await?.delete(schema, &key).await?;
        debug!(store = store, key = %key, "⊔ delete");
        Ok(())
    }

    // ========================================================================
    // Store-level operations
    // ========================================================================

    /// Number of records in the store.
    pub async fn count(&self, store: &str) -> StoreResult<usize> {
        let schema = self.store_schema(store)?;
        self.connection().await?.count(schema).await
    }

    /// All keys of the store, in the same order as `get_all`.
    pub async fn keys(&self, store: &str) -> StoreResult<Vec<Key>> {
        let schema = self.store_schema(store)?;
        self.connection().await?.keys(schema).await
    }

    /// Remove every record from the store.
    pub async fn clear(&self, store: &str) -> StoreResult<()> {
        let schema = self.store_schema(store)?;
        self.connection().await?.clear(schema).await?;
        info!(db = %self.schema.name, store = store, "⊔ store cleared");
        Ok(())
    }

    /// Remove every record from every declared store.
    pub async fn clear_all(&self) -> StoreResult<()> {
        let conn = self.connection().await?;
        for schema in &self.schema.stores {
            conn.clear(schema).await?;
        }
        info!(db = %self.schema.name, "⊔ all stores cleared");
        Ok(())
    }

    /// Copy every record of every declared store.
    pub async fn export(&self) -> StoreResult<Snapshot> {
        let conn = self.connection().await?;
        let mut snapshot = Snapshot {
            database: self.schema.name.clone(),
            version: self.schema.version,
            exported_at: now_timestamp(),
            stores: Default::default(),
        };
        for schema in &self.schema.stores {
            snapshot
                .stores
                .insert(schema.name.clone(), conn.get_all(schema).await?);
        }
        Ok(snapshot)
    }

    /// Write back a snapshot with put semantics, keeping its timestamps.
    ///
    /// Stores the schema does not declare are skipped. Returns the number of
    /// records written.
    pub async fn import(&self, snapshot: Snapshot) -> StoreResult<usize> {
        let conn = self.connection().await?;
        let mut written = 0;
        for (store, records) in snapshot.stores {
            let Some(schema) = self.schema.store_schema(&store) else {
                warn!(db = %self.schema.name, store = %store, "⊔ import skipped undeclared store");
                continue;
            };
            for record in records {
                conn.put(schema, record).await?;
                written += 1;
            }
        }
        info!(db = %self.schema.name, records = written, "⊔ snapshot imported");
        Ok(written)
    }

    /// Record counts per store and which engine is serving them.
    pub async fn stats(&self) -> StoreResult<StorageStats> {
        let conn = self.connection().await?;
        let mut stats = StorageStats {
            engine: self.engine_name().to_string(),
            degraded: self.is_degraded(),
            ..Default::default()
        };
        for schema in &self.schema.stores {
            let count = conn.count(schema).await?;
            stats.total_records += count;
            stats.stores.insert(schema.name.clone(), count);
        }
        Ok(stats)
    }

    // ========================================================================
    // Document stores
    // ========================================================================

    /// Read the single document of a document store. Returns `None` if it was
    /// never saved; a saved empty array or `null` comes back as such.
    pub async fn load_document(&self, store: &str) -> StoreResult<Option<Value>> {
        let record = self.get(store, DOCUMENT_KEY).await?;
        Ok(record.map(|mut r| r.remove(DOCUMENT_VALUE_FIELD).unwrap_or(Value::Null)))
    }

    /// Replace the single document of a document store.
    pub async fn save_document(&self, store: &str, value: Value) -> StoreResult<()> {
        let schema = self.store_schema(store)?;
        let mut record = Record::new();
        set_path(&mut record, &schema.key_path, Value::from(DOCUMENT_KEY))?;
        record.insert(DOCUMENT_VALUE_FIELD.to_string(), value);
        self.update(store, record).await
    }

    /// Close the primary engine handle and discard the store.
    pub fn close(self) {
        drop(self);
    }
}

impl<E: Engine, K: KeyValueStore> Drop for LocalStore<E, K> {
    fn drop(&mut self) {
        if let Some(Backend::Primary(conn)) = self.backend.get() {
            conn.close();
            debug!(db = %self.schema.name, "⊔ database closed");
        }
    }
}

impl<E: Engine, K: KeyValueStore> fmt::Debug for LocalStore<E, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalStore")
            .field("database", &self.schema.name)
            .field("version", &self.schema.version)
            .field("mode", &self.mode)
            .field("engine", &self.engine.name())
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use crate::memory::MemoryEngine;
    use std::sync::Arc;

    fn schema() -> DatabaseSchema {
        DatabaseSchema::new("unit", 1).store(StoreSchema::new("users", "id"))
    }

    #[test]
    fn test_mode_serde_names() {
        assert_eq!(serde_json::to_string(&EngineMode::PrimaryOnly).unwrap(), "\"primary-only\"");
        let mode: EngineMode = serde_json::from_str("\"fallback-only\"").unwrap();
        assert_eq!(mode, EngineMode::FallbackOnly);
        assert_eq!(EngineMode::default(), EngineMode::Auto);
    }

    #[test]
    fn test_build_rejects_invalid_schema() {
        let bad = DatabaseSchema::new("", 1);
        let result = LocalStore::<MemoryEngine, MemoryKv>::new(bad, MemoryEngine::new(), MemoryKv::new());
        assert!(matches!(result, Err(StoreError::Config(_))));
    }

    /// Opens a memory database, but only once `release` is notified.
    struct GatedEngine {
        inner: MemoryEngine,
        release: Arc<tokio::sync::Notify>,
    }

    #[async_trait::async_trait]
    impl Engine for GatedEngine {
        type Connection = crate::memory::MemoryConnection;

        fn name(&self) -> &'static str {
            "gated"
        }

        async fn open(&self, schema: &DatabaseSchema) -> StoreResult<Self::Connection> {
            self.release.notified().await;
            self.inner.open(schema).await
        }
    }

    fn gated(mode: EngineMode) -> LocalStore<GatedEngine, MemoryKv> {
        let engine = GatedEngine {
            inner: MemoryEngine::new(),
            release: Arc::new(tokio::sync::Notify::new()),
        };
        LocalStore::<GatedEngine, MemoryKv>::builder(schema()).mode(mode).build(engine, MemoryKv::new()).unwrap()
    }

    async fn start_then_cancel<E: Engine, K: KeyValueStore>(store: &LocalStore<E, K>) {
        tokio::select! {
            biased;
            _ = store.init() => panic!("open should still be pending"),
            _ = async {} => {}
        }
    }

    #[tokio::test]
    async fn test_cancelled_open_is_not_retried() {
        let store = gated(EngineMode::Auto);
        start_then_cancel(&store).await;
        assert_eq!(store.status(), None);

        store.engine().release.notify_one();
        store.init().await;

        assert_eq!(store.engine().inner.open_attempts(), 0);
        assert!(store.is_degraded());
        assert!(store.degraded_reason().unwrap().contains("cancelled"));
        let user = serde_json::json!({"id": 1}).as_object().cloned().unwrap();
        store.update("users", user).await.unwrap();
        assert_eq!(store.count("users").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_open_in_primary_only_is_unavailable() {
        let store = gated(EngineMode::PrimaryOnly);
        start_then_cancel(&store).await;
        store.init().await;

        assert_eq!(store.status(), Some(BackendStatus::Unavailable));
        assert!(matches!(store.count("users").await, Err(StoreError::EngineUnavailable(_))));
    }

    #[test]
    fn test_status_unset_before_init() {
        let store = LocalStore::new(schema(), MemoryEngine::new(), MemoryKv::new()).unwrap();
        assert_eq!(store.status(), None);
        assert!(!store.is_degraded());
        assert_eq!(store.degraded_reason(), None);
    }

    #[tokio::test]
    async fn test_undeclared_store_is_schema_mismatch() {
        let store = LocalStore::new(schema(), MemoryEngine::new(), MemoryKv::new()).unwrap();
        let err = store.get("nope", 1).await.unwrap_err();
        assert!(matches!(err, StoreError::SchemaMismatch(_)));
    }

    #[tokio::test]
    async fn test_debug_shows_status() {
        let store = LocalStore::new(schema(), MemoryEngine::new(), MemoryKv::new()).unwrap();
        store.init().await;
        let debug = format!("{:?}", store);
        assert!(debug.contains("Ready"));
        assert!(debug.contains("memory"));
    }
}
