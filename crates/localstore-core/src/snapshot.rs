//! Export/import snapshots and storage statistics

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::record::Record;

/// Every record of every declared store, as exported by `LocalStore::export`.
///
/// Serializes to the JSON backup shape: one array per store name plus the
/// export time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub database: String,
    pub version: u32,
    pub exported_at: String,
    pub stores: BTreeMap<String, Vec<Record>>,
}

impl Snapshot {
    /// Total number of records across all stores.
    pub fn record_count(&self) -> usize {
        self.stores.values().map(Vec::len).sum()
    }
}

/// Storage statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    /// Engine serving requests (`"fallback"` when degraded)
    pub engine: String,
    pub degraded: bool,
    /// Record count per declared store
    pub stores: BTreeMap<String, usize>,
    pub total_records: usize,
}
