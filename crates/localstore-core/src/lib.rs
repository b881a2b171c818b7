//! LocalStore Core
//!
//! A schema-declared key/object store for client-side persistence, designed to
//! run identically in the browser (WASM) and natively.
//!
//! A [`LocalStore`] opens its database once, on first use, through a primary
//! [`Engine`]. If that engine cannot open, the store degrades to a flat
//! [`KeyValueStore`] and keeps the same operation contract, so callers see the
//! same results either way.
//!
//! # Example
//!
//! ```rust
//! use localstore_core::{DatabaseSchema, LocalStore, MemoryEngine, MemoryKv, StoreSchema};
//! use serde_json::json;
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let schema = DatabaseSchema::new("ContactLedgerDB", 1).store(
//!     StoreSchema::new("contacts", "id")
//!         .auto_increment()
//!         .index("companyId", "companyId"),
//! );
//! let store = LocalStore::new(schema, MemoryEngine::new(), MemoryKv::new()).unwrap();
//!
//! let contact = json!({"name": "Ada", "companyId": 7});
//! let id = store.add("contacts", contact.as_object().unwrap().clone()).await.unwrap();
//! let hits = store.get_by_index("contacts", "companyId", 7).await.unwrap();
//! assert_eq!(hits.len(), 1);
//! assert!(store.get("contacts", id).await.unwrap().is_some());
//! # });
//! ```

pub mod engine;
pub mod error;
pub mod fallback;
pub mod kv;
pub mod local_store;
pub mod memory;
pub mod record;
pub mod schema;
pub mod snapshot;

// Re-export main types at crate root
pub use engine::{Connection, Engine, MaybeSendSync};
pub use error::{ErrorKind, StoreError, StoreResult};
pub use fallback::FallbackStore;
pub use kv::{KeyValueStore, MemoryKv};
pub use local_store::{BackendStatus, EngineMode, LocalStore, LocalStoreBuilder, DOCUMENT_KEY};
pub use memory::{MemoryConnection, MemoryEngine};
pub use record::{Key, Record, CREATED_AT, UPDATED_AT};
pub use schema::{DatabaseSchema, IndexSchema, StoreSchema};
pub use snapshot::{Snapshot, StorageStats};
