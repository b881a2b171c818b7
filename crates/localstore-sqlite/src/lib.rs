//! SQLite engine for localstore databases
//!
//! This crate provides a persistent SQLite implementation of the
//! localstore-core `Engine` and `Connection` traits, so native processes
//! (servers, desktop shells, tests) can keep the same databases a browser keeps
//! in IndexedDB.
//!
//! # Features
//!
//! - Version handshake through `PRAGMA user_version`, with check-then-create upgrades
//! - One table per store; records kept whole as JSON
//! - Secondary indexes as `json_extract` expression indexes
//! - Per-store key generator for auto-increment stores
//! - In-memory databases for testing
//!
//! # Example
//!
//! ```rust,no_run
//! use localstore_core::{DatabaseSchema, LocalStore, MemoryKv, StoreSchema};
//! use localstore_sqlite::SqliteEngine;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let schema = DatabaseSchema::new("ContactLedgerDB", 1)
//!     .store(StoreSchema::new("contacts", "id").auto_increment().index("companyId", "companyId"));
//!
//! // One file per database under ./data
//! let store = LocalStore::new(schema, SqliteEngine::new("./data"), MemoryKv::new())?;
//!
//! let contact = serde_json::json!({"name": "Ada", "companyId": 7});
//! let id = store.add("contacts", contact.as_object().cloned().unwrap_or_default()).await?;
//! assert!(store.get("contacts", id).await?.is_some());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod json;
pub mod migrate;
pub mod store;

// Re-export main types
pub use error::{Result, SqliteError};
pub use store::{SqliteConnection, SqliteEngine};
