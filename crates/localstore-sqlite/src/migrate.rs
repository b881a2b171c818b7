//! Version handshake and store catalog
//!
//! The schema version lives in `PRAGMA user_version`. Declared stores and
//! indexes are recorded in two catalog tables next to the store tables, so a
//! connection can tell which stores physically exist and which field each
//! index covers.
//!
//! Upgrades are check-then-create: a store or index already in the catalog is
//! left alone, so a database whose earlier upgrade stopped halfway is
//! completed rather than rejected.

use localstore_core::{DatabaseSchema, IndexSchema, StoreError, StoreSchema};
use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use crate::error::{Result, SqliteError};
use crate::json::{field_expr, quote_ident};

const CATALOG_SQL: &str = "
CREATE TABLE IF NOT EXISTS _localstore_stores (
    name TEXT PRIMARY KEY,
    key_path TEXT NOT NULL,
    auto_increment INTEGER NOT NULL DEFAULT 0,
    next_key INTEGER NOT NULL DEFAULT 1
);
CREATE TABLE IF NOT EXISTS _localstore_indexes (
    store TEXT NOT NULL,
    name TEXT NOT NULL,
    field TEXT NOT NULL,
    is_unique INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (store, name)
);";

/// A store as it physically exists in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreMeta {
    pub name: String,
    pub key_path: String,
    pub auto_increment: bool,
}

impl StoreMeta {
    /// Quoted name of the table holding the store's rows
    pub fn table(&self) -> String {
        table_name(&self.name)
    }
}

fn table_name(store: &str) -> String {
    quote_ident(&format!("store_{}", store))
}

fn index_name(store: &str, index: &str) -> String {
    // ':' is not a legal store or index name character, so names cannot collide
    quote_ident(&format!("idx:{}:{}", store, index))
}

/// Persisted schema version (0 for a fresh file)
pub fn user_version(conn: &Connection) -> Result<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

/// Bring the file up to `schema.version`.
///
/// Returns the version found before the upgrade. Fails with
/// `SqliteError::VersionTooHigh` when the file is newer than the schema.
pub fn upgrade(conn: &Connection, schema: &DatabaseSchema) -> Result<u32> {
    conn.execute_batch(CATALOG_SQL)?;

    let current = user_version(conn)?;
    if current > schema.version {
        return Err(SqliteError::VersionTooHigh {
            database: schema.name.clone(),
            found: current,
            requested: schema.version,
        });
    }
    if current == schema.version {
        return Ok(current);
    }

    // Apply in a transaction
    let tx = conn.unchecked_transaction()?;
    for store in &schema.stores {
        if store_meta_opt(&tx, &store.name)?.is_none() {
            create_store(&tx, store)?;
        }
        for index in &store.indexes {
            if index_meta_opt(&tx, &store.name, &index.name)?.is_none() {
                create_index(&tx, store, index)?;
            }
        }
    }
    tx.pragma_update(None, "user_version", schema.version)?;
    tx.commit()?;

    debug!(db = %schema.name, from = current, to = schema.version, "⊔ sqlite upgrade applied");
    Ok(current)
}

fn create_store(conn: &Connection, store: &StoreSchema) -> Result<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} (pk PRIMARY KEY NOT NULL, body TEXT NOT NULL)",
        table_name(&store.name)
    ))?;
    conn.execute(
        "INSERT INTO _localstore_stores (name, key_path, auto_increment) VALUES (?1, ?2, ?3)",
        rusqlite::params![store.name, store.key_path, store.auto_increment],
    )?;
    Ok(())
}

fn create_index(conn: &Connection, store: &StoreSchema, index: &IndexSchema) -> Result<()> {
    // Uniqueness is checked on write; the SQL index only serves lookups.
    conn.execute_batch(&format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
        index_name(&store.name, &index.name),
        table_name(&store.name),
        field_expr(&index.field)
    ))?;
    conn.execute(
        "INSERT INTO _localstore_indexes (store, name, field, is_unique) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![store.name, index.name, index.field, index.unique],
    )?;
    Ok(())
}

fn store_meta_opt(conn: &Connection, store: &str) -> Result<Option<StoreMeta>> {
    let meta = conn
        .query_row(
            "SELECT name, key_path, auto_increment FROM _localstore_stores WHERE name = ?1",
            [store],
            |row| {
                Ok(StoreMeta {
                    name: row.get(0)?,
                    key_path: row.get(1)?,
                    auto_increment: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(meta)
}

fn index_meta_opt(conn: &Connection, store: &str, index: &str) -> Result<Option<IndexSchema>> {
    let meta = conn
        .query_row(
            "SELECT name, field, is_unique FROM _localstore_indexes WHERE store = ?1 AND name = ?2",
            [store, index],
            |row| {
                Ok(IndexSchema {
                    name: row.get(0)?,
                    field: row.get(1)?,
                    unique: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(meta)
}

/// Catalog entry of a store, or `SchemaMismatch` if it was never created.
pub fn store_meta(conn: &Connection, store: &str) -> Result<StoreMeta> {
    store_meta_opt(conn, store)?.ok_or_else(|| {
        StoreError::SchemaMismatch(format!("store '{}' does not exist in the SQLite file", store)).into()
    })
}

/// Catalog entry of an index, or `SchemaMismatch` if it was never created.
pub fn index_meta(conn: &Connection, store: &str, index: &str) -> Result<IndexSchema> {
    index_meta_opt(conn, store, index)?.ok_or_else(|| {
        StoreError::SchemaMismatch(format!(
            "index '{}' does not exist on store '{}' in the SQLite file",
            index, store
        ))
        .into()
    })
}

/// Unique indexes physically present on a store
pub fn unique_indexes(conn: &Connection, store: &str) -> Result<Vec<IndexSchema>> {
    let mut stmt = conn.prepare(
        "SELECT name, field, is_unique FROM _localstore_indexes WHERE store = ?1 AND is_unique = 1 ORDER BY name",
    )?;
    let indexes = stmt
        .query_map([store], |row| {
            Ok(IndexSchema {
                name: row.get(0)?,
                field: row.get(1)?,
                unique: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
    Ok(indexes)
}

/// Names of every store in the catalog, sorted
pub fn store_names(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM _localstore_stores ORDER BY name")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
    Ok(names)
}

/// Next value of a store's key generator
pub fn next_key(conn: &Connection, store: &str) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT next_key FROM _localstore_stores WHERE name = ?1",
        [store],
        |row| row.get(0),
    )?)
}

/// Raise a store's key generator to at least `at_least`
pub fn bump_key(conn: &Connection, store: &str, at_least: i64) -> Result<()> {
    conn.execute(
        "UPDATE _localstore_stores SET next_key = MAX(next_key, ?2) WHERE name = ?1",
        rusqlite::params![store, at_least],
    )?;
    Ok(())
}
