//! Schema descriptor: database name, version, and the stores it declares.
//!
//! The descriptor is declared once when a [`LocalStore`](crate::LocalStore) is
//! built and never changes afterwards. Engines use it during the open handshake
//! to create whatever stores and indexes are missing.
//!
//! # Example
//!
//! ```rust
//! use localstore_core::schema::{DatabaseSchema, StoreSchema};
//!
//! let schema = DatabaseSchema::new("ContactLedgerDB", 1)
//!     .store(
//!         StoreSchema::new("contacts", "id")
//!             .auto_increment()
//!             .index("companyId", "companyId")
//!             .index("name", "name"),
//!     )
//!     .store(StoreSchema::new("companies", "id").auto_increment());
//!
//! schema.validate().unwrap();
//! assert!(schema.store_schema("contacts").is_some());
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Key path used by document stores.
pub const DOCUMENT_KEY_PATH: &str = "key";

/// Field holding the payload of a document store record.
pub const DOCUMENT_VALUE_FIELD: &str = "value";

/// A secondary index on one field of a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSchema {
    /// Index name, used by `get_by_index`
    pub name: String,
    /// Indexed field (dotted paths allowed)
    pub field: String,
    /// Whether two records may share a value
    #[serde(default)]
    pub unique: bool,
}

/// A named logical table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSchema {
    #[serde(alias = "storeName")]
    pub name: String,
    pub key_path: String,
    #[serde(default)]
    pub auto_increment: bool,
    #[serde(default)]
    pub indexes: Vec<IndexSchema>,
}

impl StoreSchema {
    /// A store keyed by `key_path`, no auto-increment, no indexes.
    pub fn new(name: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: key_path.into(),
            auto_increment: false,
            indexes: Vec::new(),
        }
    }

    /// A degenerate store holding a single JSON document (cache blobs, app state).
    ///
    /// Records look like `{"key": "document", "value": <any JSON>}`.
    pub fn document(name: impl Into<String>) -> Self {
        Self::new(name, DOCUMENT_KEY_PATH)
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    /// Add a non-unique index.
    pub fn index(mut self, name: impl Into<String>, field: impl Into<String>) -> Self {
        self.indexes.push(IndexSchema {
            name: name.into(),
            field: field.into(),
            unique: false,
        });
        self
    }

    /// Add a unique index.
    pub fn unique_index(mut self, name: impl Into<String>, field: impl Into<String>) -> Self {
        self.indexes.push(IndexSchema {
            name: name.into(),
            field: field.into(),
            unique: true,
        });
        self
    }

    /// Look up a declared index by name.
    pub fn index_schema(&self, name: &str) -> Option<&IndexSchema> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// Unique indexes only.
    pub fn unique_indexes(&self) -> impl Iterator<Item = &IndexSchema> {
        self.indexes.iter().filter(|i| i.unique)
    }

    fn validate(&self) -> StoreResult<()> {
        check_name("store", &self.name)?;
        check_field(&self.name, "key path", &self.key_path)?;

        let mut seen = HashSet::new();
        for index in &self.indexes {
            check_name("index", &index.name)?;
            check_field(&self.name, "index field", &index.field)?;
            if !seen.insert(index.name.as_str()) {
                return Err(StoreError::Config(format!(
                    "duplicate index '{}' in store '{}'",
                    index.name, self.name
                )));
            }
        }
        Ok(())
    }
}

/// A named collection of stores plus its schema version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSchema {
    pub name: String,
    pub version: u32,
    #[serde(default)]
    pub stores: Vec<StoreSchema>,
}

impl DatabaseSchema {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
            stores: Vec::new(),
        }
    }

    /// Declare a store.
    pub fn store(mut self, store: StoreSchema) -> Self {
        self.stores.push(store);
        self
    }

    /// Look up a declared store by name.
    pub fn store_schema(&self, name: &str) -> Option<&StoreSchema> {
        self.stores.iter().find(|s| s.name == name)
    }

    /// Names of all declared stores, in declaration order.
    pub fn store_names(&self) -> impl Iterator<Item = &str> {
        self.stores.iter().map(|s| s.name.as_str())
    }

    /// Check the descriptor for mistakes an engine would only report at open time.
    pub fn validate(&self) -> StoreResult<()> {
        if self.name.trim().is_empty() {
            return Err(StoreError::Config("database name is empty".into()));
        }
        if self.version == 0 {
            return Err(StoreError::Config(format!(
                "database '{}' has version 0; versions start at 1",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for store in &self.stores {
            store.validate()?;
            if !seen.insert(store.name.as_str()) {
                return Err(StoreError::Config(format!(
                    "duplicate store '{}' in database '{}'",
                    store.name, self.name
                )));
            }
        }
        Ok(())
    }
}

fn check_name(what: &str, name: &str) -> StoreResult<()> {
    if name.is_empty() {
        return Err(StoreError::Config(format!("{} name is empty", what)));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '$'))
    {
        return Err(StoreError::Config(format!(
            "{} name '{}' contains unsupported characters",
            what, name
        )));
    }
    Ok(())
}

// Fields end up inside SQL JSON paths, so keep them to identifier characters.
fn check_field(store: &str, what: &str, field: &str) -> StoreResult<()> {
    let valid = !field.is_empty()
        && field.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$'))
        });
    if !valid {
        return Err(StoreError::Config(format!(
            "{} '{}' in store '{}' is not a valid field path",
            what, field, store
        )));
    }
    Ok(())
}
