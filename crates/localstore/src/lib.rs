//! # localstore
//!
//! Shared entry point for native localstore users:
//! - **config**: JSON store configuration (`StoreConfig`)
//! - **error**: Common error type
//! - **tracing**: Logging setup with the `⊔` database prefix
//! - [`open_native`]: a SQLite-backed store built from a config
//!
//! The store itself lives in `localstore-core` and is re-exported here.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use localstore::{open_native, StoreConfig};
//!
//! # async fn demo() -> localstore::Result<()> {
//! localstore::tracing::init();
//!
//! let config = StoreConfig::load("store.json")?;
//! let store = open_native(&config)?;
//! store.init().await;
//! if store.is_degraded() {
//!     tracing::warn!("running on the in-process fallback");
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod tracing;

pub use config::StoreConfig;
pub use error::{Error, Result};

pub use localstore_core::{
    BackendStatus, DatabaseSchema, EngineMode, ErrorKind, IndexSchema, Key, KeyValueStore,
    LocalStore, LocalStoreBuilder, MemoryKv, Record, Snapshot, StorageStats, StoreError,
    StoreResult, StoreSchema,
};

#[cfg(feature = "sqlite")]
pub use localstore_sqlite::SqliteEngine;

/// Native store: SQLite primary engine, process-wide in-memory fallback.
#[cfg(feature = "sqlite")]
pub type NativeStore = LocalStore<SqliteEngine, MemoryKv>;

/// Build a native store from a validated config.
///
/// The database is not opened until the first operation or `init()`.
#[cfg(feature = "sqlite")]
pub fn open_native(config: &StoreConfig) -> Result<NativeStore> {
    config.validate()?;
    let engine = match &config.data_dir {
        Some(dir) => SqliteEngine::new(dir),
        None => SqliteEngine::in_memory(),
    };
    ::tracing::debug!(
        db = %config.database.name,
        mode = %config.engine,
        dir = ?config.data_dir,
        "{} native store configured",
        tracing::prefix::DB
    );
    let store = NativeStore::builder(config.database.clone())
        .mode(config.engine)
        .build(engine, MemoryKv::shared())?;
    Ok(store)
}
