//! IndexedDB engine and localStorage fallback for localstore (browser WASM)
//!
//! This crate provides the browser implementations of the localstore-core
//! engine traits: [`IndexedDbEngine`] as the primary engine and
//! [`WebStorageKv`] as the key/value namespace the store degrades to when
//! IndexedDB cannot be opened (private browsing, disabled storage, a stale tab
//! blocking an upgrade).
//!
//! Everything here only exists on `wasm32`; on other targets the crate is empty.
//!
//! # Schema
//!
//! Each declared store becomes an object store with an inline key path and,
//! when requested, a key generator. Each declared index becomes an IndexedDB
//! index on its field, unique when declared unique.
//!
//! # Example
//!
//! ```rust,ignore
//! use localstore_core::{DatabaseSchema, LocalStore, StoreSchema};
//! use localstore_indexeddb::{IndexedDbEngine, WebStorageKv};
//!
//! let schema = DatabaseSchema::new("ContactLedgerDB", 1)
//!     .store(StoreSchema::new("contacts", "id").auto_increment().index("companyId", "companyId"));
//!
//! let store = LocalStore::new(schema, IndexedDbEngine::new(), WebStorageKv::local()?)?;
//! store.init().await;
//! if store.is_degraded() {
//!     // Still usable, just not in IndexedDB.
//! }
//! ```

#[cfg(target_arch = "wasm32")]
pub mod error;
#[cfg(target_arch = "wasm32")]
pub mod idb;
#[cfg(target_arch = "wasm32")]
pub mod kv;
#[cfg(target_arch = "wasm32")]
pub mod store;

#[cfg(target_arch = "wasm32")]
pub use error::{IndexedDbError, Result};
#[cfg(target_arch = "wasm32")]
pub use kv::WebStorageKv;
#[cfg(target_arch = "wasm32")]
pub use store::{IndexedDbConnection, IndexedDbEngine};
