//! Store configuration loaded from JSON.
//!
//! ```json
//! {
//!   "database": {
//!     "name": "ContactLedgerDB",
//!     "version": 2,
//!     "stores": [
//!       { "name": "contacts", "keyPath": "id", "autoIncrement": true,
//!         "indexes": [{ "name": "email", "field": "email", "unique": true }] }
//!     ]
//!   },
//!   "engine": "auto",
//!   "dataDir": "./data"
//! }
//! ```
//!
//! `engine` defaults to `"auto"`. Without `dataDir` the native store keeps its
//! SQLite database in memory.

use std::path::{Path, PathBuf};

use localstore_core::{DatabaseSchema, EngineMode};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Everything needed to build a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StoreConfig {
    pub database: DatabaseSchema,
    #[serde(default)]
    pub engine: EngineMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

impl StoreConfig {
    pub fn new(database: DatabaseSchema) -> Self {
        Self {
            database,
            engine: EngineMode::default(),
            data_dir: None,
        }
    }

    pub fn engine(mut self, engine: EngineMode) -> Self {
        self.engine = engine;
        self
    }

    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: StoreConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json).map_err(|e| match e {
            Error::Serialization(e) => Error::Config(format!("{}: {}", path.display(), e)),
            other => other,
        })
    }

    pub fn validate(&self) -> Result<()> {
        self.database.validate()?;
        if let Some(dir) = &self.data_dir {
            if dir.as_os_str().is_empty() {
                return Err(Error::Config("dataDir is empty".into()));
            }
            if dir.is_file() {
                return Err(Error::Config(format!(
                    "dataDir {} is a file, expected a directory",
                    dir.display()
                )));
            }
        }
        Ok(())
    }
}
