//! SQLite engine implementing the `Engine` and `Connection` traits

use std::path::PathBuf;

use async_trait::async_trait;
use localstore_core::record::{field_matches, is_indexable, key_of, resolve_path, set_path};
use localstore_core::{
    Connection, DatabaseSchema, Engine, IndexSchema, Key, Record, StoreError, StoreResult,
    StoreSchema,
};
use parking_lot::Mutex;
use rusqlite::OptionalExtension;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Result, SqliteError};
use crate::json::{
    field_expr, index_value_to_sql, key_to_sql, record_to_sql, sql_to_key, sql_to_record,
};
use crate::migrate::{self, StoreMeta};

/// Where an engine keeps its database files.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Location {
    /// A fresh private database per open
    Memory,
    /// `{dir}/{database}.sqlite3`
    Directory(PathBuf),
    /// One file, whatever the database name
    File(PathBuf),
}

/// SQLite-backed engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteEngine {
    location: Location,
}

impl SqliteEngine {
    /// Keep one file per database under `data_dir`, created on first open.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            location: Location::Directory(data_dir.into()),
        }
    }

    /// Open exactly `path`, whatever the database is called.
    pub fn open_path(path: impl Into<PathBuf>) -> Self {
        Self {
            location: Location::File(path.into()),
        }
    }

    /// In-memory databases (for testing). Nothing survives the connection.
    pub fn in_memory() -> Self {
        Self {
            location: Location::Memory,
        }
    }

    /// File a database will be stored in, `None` for in-memory engines
    pub fn database_path(&self, database: &str) -> Option<PathBuf> {
        match &self.location {
            Location::Memory => None,
            Location::Directory(dir) => Some(dir.join(format!("{}.sqlite3", database))),
            Location::File(path) => Some(path.clone()),
        }
    }

    fn connect(&self, database: &str) -> Result<rusqlite::Connection> {
        match self.database_path(database) {
            None => Ok(rusqlite::Connection::open_in_memory()?),
            Some(path) => {
                if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                    std::fs::create_dir_all(dir)?;
                }
                Ok(rusqlite::Connection::open(path)?)
            }
        }
    }
}

#[async_trait]
impl Engine for SqliteEngine {
    type Connection = SqliteConnection;

    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn open(&self, schema: &DatabaseSchema) -> StoreResult<SqliteConnection> {
        let conn = self.connect(&schema.name)?;
        let previous = migrate::upgrade(&conn, schema)?;
        if previous < schema.version {
            info!(db = %schema.name, from = previous, to = schema.version, "⊔ sqlite schema upgraded");
        }
        Ok(SqliteConnection::new(conn, schema.name.clone()))
    }
}

/// One open SQLite database.
///
/// Every operation holds the connection lock for its whole transaction, so
/// operations on one connection never interleave.
pub struct SqliteConnection {
    conn: Mutex<Option<rusqlite::Connection>>,
    database: String,
}

impl SqliteConnection {
    /// Wrap a connection whose handshake has already run.
    pub fn new(conn: rusqlite::Connection, database: impl Into<String>) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
            database: database.into(),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Stores present in the file, sorted
    pub fn store_names(&self) -> StoreResult<Vec<String>> {
        self.with_conn(migrate::store_names)
    }

    fn with_conn<T>(&self, f: impl FnOnce(&rusqlite::Connection) -> Result<T>) -> StoreResult<T> {
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or(SqliteError::Closed)?;
        Ok(f(conn)?)
    }
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("database", &self.database)
            .finish()
    }
}

fn read_bodies(stmt: &mut rusqlite::Statement<'_>) -> Result<Vec<Record>> {
    let bodies = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
    bodies.iter().map(|body| sql_to_record(body)).collect()
}

fn select_one(conn: &rusqlite::Connection, meta: &StoreMeta, key: &Key) -> Result<Option<Record>> {
    let body: Option<String> = conn
        .query_row(
            &format!("SELECT body FROM {} WHERE pk = ?1", meta.table()),
            [key_to_sql(key)],
            |row| row.get(0),
        )
        .optional()?;
    body.as_deref().map(sql_to_record).transpose()
}

fn exists(conn: &rusqlite::Connection, meta: &StoreMeta, key: &Key) -> Result<bool> {
    Ok(conn
        .prepare(&format!("SELECT 1 FROM {} WHERE pk = ?1", meta.table()))?
        .exists([key_to_sql(key)])?)
}

/// Rows whose `field` equals `value`, in key order, re-checked against the
/// record model (SQLite would also match `true` against `1`).
fn select_by_field(
    conn: &rusqlite::Connection,
    meta: &StoreMeta,
    field: &str,
    value: &Value,
) -> Result<Vec<(Key, Record)>> {
    let Some(param) = index_value_to_sql(value) else {
        return Ok(Vec::new());
    };
    let mut stmt = conn.prepare(&format!(
        "SELECT pk, body FROM {} WHERE {} = ?1 ORDER BY pk",
        meta.table(),
        field_expr(field)
    ))?;
    let rows = stmt
        .query_map([param], |row| {
            Ok((row.get::<_, rusqlite::types::Value>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

    let mut matches = Vec::with_capacity(rows.len());
    for (pk, body) in rows {
        let record = sql_to_record(&body)?;
        if field_matches(&record, field, value) {
            matches.push((sql_to_key(pk)?, record));
        }
    }
    Ok(matches)
}

/// Resolve the record's key, running the store's key generator when needed.
fn resolve_key(conn: &rusqlite::Connection, meta: &StoreMeta, record: &mut Record) -> Result<Key> {
    match key_of(record, &meta.key_path)? {
        Some(key) => {
            if let (true, Key::Int(i)) = (meta.auto_increment, &key) {
                migrate::bump_key(conn, &meta.name, i.saturating_add(1))?;
            }
            Ok(key)
        }
        None if meta.auto_increment => {
            let next = migrate::next_key(conn, &meta.name)?;
            let after = next
                .checked_add(1)
                .ok_or_else(|| StoreError::Transaction("key generator exhausted".into()))?;
            migrate::bump_key(conn, &meta.name, after)?;
            set_path(record, &meta.key_path, Value::from(next))?;
            Ok(Key::Int(next))
        }
        None => Err(StoreError::InvalidKey(format!(
            "record has no '{}' and store '{}' does not auto-increment",
            meta.key_path, meta.name
        ))
        .into()),
    }
}

fn check_unique(conn: &rusqlite::Connection, meta: &StoreMeta, record: &Record, key: &Key) -> Result<()> {
    for index in migrate::unique_indexes(conn, &meta.name)? {
        let Some(value) = resolve_path(record, &index.field).filter(|v| is_indexable(v)) else {
            continue;
        };
        let holders = select_by_field(conn, meta, &index.field, value)?;
        if holders.iter().any(|(holder, _)| holder != key) {
            return Err(StoreError::Constraint {
                store: meta.name.clone(),
                index: index.name,
            }
            .into());
        }
    }
    Ok(())
}

fn write(conn: &rusqlite::Connection, meta: &StoreMeta, key: &Key, record: &Record) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO {} (pk, body) VALUES (?1, ?2)
             ON CONFLICT(pk) DO UPDATE SET body = excluded.body",
            meta.table()
        ),
        rusqlite::params![key_to_sql(key), record_to_sql(record)?],
    )?;
    Ok(())
}

#[async_trait]
impl Connection for SqliteConnection {
    async fn get(&self, store: &StoreSchema, key: &Key) -> StoreResult<Option<Record>> {
        self.with_conn(|conn| {
            let meta = migrate::store_meta(conn, &store.name)?;
            select_one(conn, &meta, key)
        })
    }

    async fn get_all(&self, store: &StoreSchema) -> StoreResult<Vec<Record>> {
        self.with_conn(|conn| {
            let meta = migrate::store_meta(conn, &store.name)?;
            let mut stmt = conn.prepare(&format!("SELECT body FROM {} ORDER BY pk", meta.table()))?;
            read_bodies(&mut stmt)
        })
    }

    async fn get_by_index(
        &self,
        store: &StoreSchema,
        index: &IndexSchema,
        value: &Value,
    ) -> StoreResult<Vec<Record>> {
        self.with_conn(|conn| {
            let meta = migrate::store_meta(conn, &store.name)?;
            let physical = migrate::index_meta(conn, &store.name, &index.name)?;
            let rows = select_by_field(conn, &meta, &physical.field, value)?;
            Ok(rows.into_iter().map(|(_, record)| record).collect())
        })
    }

    async fn add(&self, store: &StoreSchema, mut record: Record) -> StoreResult<Key> {
        let key = self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let meta = migrate::store_meta(&tx, &store.name)?;
            let key = resolve_key(&tx, &meta, &mut record)?;
            if exists(&tx, &meta, &key)? {
                return Err(StoreError::DuplicateKey {
                    store: store.name.clone(),
                    key,
                }
                .into());
            }
            check_unique(&tx, &meta, &record, &key)?;
            write(&tx, &meta, &key, &record)?;
            tx.commit()?;
            Ok(key)
        })?;
        debug!(db = %self.database, store = %store.name, key = %key, "⊔ sqlite add");
        Ok(key)
    }

    async fn put(&self, store: &StoreSchema, mut record: Record) -> StoreResult<Key> {
        let key = self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let meta = migrate::store_meta(&tx, &store.name)?;
            let key = resolve_key(&tx, &meta, &mut record)?;
            check_unique(&tx, &meta, &record, &key)?;
            write(&tx, &meta, &key, &record)?;
            tx.commit()?;
            Ok(key)
        })?;
        debug!(db = %self.database, store = %store.name, key = %key, "⊔ sqlite put");
        Ok(key)
    }

    async fn delete(&self, store: &StoreSchema, key: &Key) -> StoreResult<()> {
        self.with_conn(|conn| {
            let meta = migrate::store_meta(conn, &store.name)?;
            conn.execute(
                &format!("DELETE FROM {} WHERE pk = ?1", meta.table()),
                [key_to_sql(key)],
            )?;
            Ok(())
        })
    }

    async fn keys(&self, store: &StoreSchema) -> StoreResult<Vec<Key>> {
        self.with_conn(|conn| {
            let meta = migrate::store_meta(conn, &store.name)?;
            let mut stmt = conn.prepare(&format!("SELECT pk FROM {} ORDER BY pk", meta.table()))?;
            let raw = stmt
                .query_map([], |row| row.get::<_, rusqlite::types::Value>(0))?
                .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
            raw.into_iter().map(sql_to_key).collect()
        })
    }

    async fn count(&self, store: &StoreSchema) -> StoreResult<usize> {
        self.with_conn(|conn| {
            let meta = migrate::store_meta(conn, &store.name)?;
            let count: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM {}", meta.table()),
                [],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }

    async fn clear(&self, store: &StoreSchema) -> StoreResult<()> {
        self.with_conn(|conn| {
            let meta = migrate::store_meta(conn, &store.name)?;
            conn.execute(&format!("DELETE FROM {}", meta.table()), [])?;
            Ok(())
        })
    }

    fn close(&self) {
        if self.conn.lock().take().is_some() {
            debug!(db = %self.database, "⊔ sqlite connection closed");
        }
    }
}

