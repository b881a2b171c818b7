//! Engine trait definitions
//!
//! An [`Engine`] knows how to open a named database at a schema version,
//! running the upgrade handshake when the persisted version is older. The
//! resulting [`Connection`] is the per-database handle all record operations
//! go through.
//!
//! Implementations:
//! - **Memory**: in-process engine with browser semantics ([`MemoryEngine`](crate::MemoryEngine))
//! - **Fallback**: flat key/value namespace ([`FallbackStore`](crate::FallbackStore)), connection only
//! - **SQLite**: native persistence (`localstore-sqlite`)
//! - **IndexedDB**: browser persistence (`localstore-indexeddb`, WASM only)
//!
//! Futures are `Send` on native targets. Browser handles are not `Send`, so on
//! wasm32 the traits drop that requirement.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreResult;
use crate::record::{Key, Record};
use crate::schema::{DatabaseSchema, IndexSchema, StoreSchema};

/// `Send + Sync` on native targets, no bound on wasm32.
#[cfg(not(target_arch = "wasm32"))]
pub trait MaybeSendSync: Send + Sync {}
#[cfg(not(target_arch = "wasm32"))]
impl<T: Send + Sync> MaybeSendSync for T {}

/// `Send + Sync` on native targets, no bound on wasm32.
#[cfg(target_arch = "wasm32")]
pub trait MaybeSendSync {}
#[cfg(target_arch = "wasm32")]
impl<T> MaybeSendSync for T {}

/// A storage engine able to open databases.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait Engine: MaybeSendSync {
    /// Handle to one open database.
    type Connection: Connection;

    /// Short engine name for logs and stats.
    fn name(&self) -> &'static str;

    /// Open `schema.name` at `schema.version`.
    ///
    /// When the persisted version is lower, create every declared store and
    /// index that does not exist yet (check-then-create, so a half-finished
    /// earlier upgrade is completed rather than failing). When it is higher,
    /// fail. Any failure here sends a `LocalStore` into degraded mode.
    async fn open(&self, schema: &DatabaseSchema) -> StoreResult<Self::Connection>;
}

/// Record operations against one open database.
///
/// Store and index arguments have already been checked against the declared
/// schema; a connection only has to report stores missing from the engine itself.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait Connection: MaybeSendSync {
    /// Retrieve a record by key. Returns `None` if not found.
    async fn get(&self, store: &StoreSchema, key: &Key) -> StoreResult<Option<Record>>;

    /// All records, in the engine's natural order.
    async fn get_all(&self, store: &StoreSchema) -> StoreResult<Vec<Record>>;

    /// Records whose indexed field equals `value`.
    async fn get_by_index(
        &self,
        store: &StoreSchema,
        index: &IndexSchema,
        value: &Value,
    ) -> StoreResult<Vec<Record>>;

    /// Insert a new record.
    ///
    /// Assigns a key when the store auto-increments and the record has none.
    /// Returns `StoreError::DuplicateKey` if the key is taken.
    async fn add(&self, store: &StoreSchema, record: Record) -> StoreResult<Key>;

    /// Insert or replace a record by its key.
    async fn put(&self, store: &StoreSchema, record: Record) -> StoreResult<Key>;

    /// Remove a record. Absent keys are not an error.
    async fn delete(&self, store: &StoreSchema, key: &Key) -> StoreResult<()>;

    /// All keys, in the same order as `get_all`.
    async fn keys(&self, store: &StoreSchema) -> StoreResult<Vec<Key>>;

    /// Number of records in the store.
    async fn count(&self, store: &StoreSchema) -> StoreResult<usize> {
        Ok(self.keys(store).await?.len())
    }

    /// Remove every record from the store.
    async fn clear(&self, store: &StoreSchema) -> StoreResult<()>;

    /// Release the underlying handle.
    fn close(&self) {}
}
