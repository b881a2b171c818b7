//! CRUD operation tests for SqliteEngine

use localstore_core::{
    Connection, DatabaseSchema, Engine, Key, LocalStore, MemoryKv, Record, StoreError,
    StoreSchema,
};
use localstore_sqlite::SqliteEngine;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("not an object: {}", other),
    }
}

/// Helper to create the test schema
fn ledger(version: u32) -> DatabaseSchema {
    DatabaseSchema::new("ContactLedgerDB", version)
        .store(
            StoreSchema::new("contacts", "id")
                .auto_increment()
                .index("companyId", "companyId")
                .unique_index("email", "email"),
        )
        .store(StoreSchema::new("tags", "slug"))
}

#[tokio::test]
async fn test_put_and_get() {
    let schema = ledger(1);
    let conn = SqliteEngine::in_memory().open(&schema).await.unwrap();
    let tags = schema.store_schema("tags").unwrap();

    let input = record(json!({"slug": "vip", "nested": {"a": [1, 2.5, "x"]}, "flag": true}));
    let key = conn.put(tags, input.clone()).await.unwrap();
    assert_eq!(key, Key::from("vip"));

    let retrieved = conn.get(tags, &key).await.unwrap();
    assert_eq!(retrieved, Some(input));
}

#[tokio::test]
async fn test_add_duplicate_fails() {
    let schema = ledger(1);
    let conn = SqliteEngine::in_memory().open(&schema).await.unwrap();
    let tags = schema.store_schema("tags").unwrap();

    conn.add(tags, record(json!({"slug": "a", "v": 1}))).await.unwrap();
    let err = conn.add(tags, record(json!({"slug": "a", "v": 2}))).await.unwrap_err();

    assert_eq!(
        err,
        StoreError::DuplicateKey { store: "tags".into(), key: Key::from("a") }
    );
    let kept = conn.get(tags, &Key::from("a")).await.unwrap().unwrap();
    assert_eq!(kept["v"], json!(1));
}

#[tokio::test]
async fn test_get_nonexistent() {
    let schema = ledger(1);
    let conn = SqliteEngine::in_memory().open(&schema).await.unwrap();
    let result = conn.get(schema.store_schema("tags").unwrap(), &Key::from("nope")).await.unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let schema = ledger(1);
    let conn = SqliteEngine::in_memory().open(&schema).await.unwrap();
    let tags = schema.store_schema("tags").unwrap();

    conn.add(tags, record(json!({"slug": "a"}))).await.unwrap();
    conn.delete(tags, &Key::from("a")).await.unwrap();
    conn.delete(tags, &Key::from("a")).await.unwrap();

    assert_eq!(conn.count(tags).await.unwrap(), 0);
}

#[tokio::test]
async fn test_auto_increment_never_reuses_keys() {
    let schema = ledger(1);
    let conn = SqliteEngine::in_memory().open(&schema).await.unwrap();
    let contacts = schema.store_schema("contacts").unwrap();

    let first = conn.add(contacts, record(json!({"name": "A"}))).await.unwrap();
    conn.delete(contacts, &first).await.unwrap();
    let second = conn.add(contacts, record(json!({"name": "B"}))).await.unwrap();
    assert_eq!((first, second.clone()), (Key::Int(1), Key::Int(2)));

    let stored = conn.get(contacts, &second).await.unwrap().unwrap();
    assert_eq!(stored["id"], json!(2));

    conn.add(contacts, record(json!({"id": 50}))).await.unwrap();
    assert_eq!(conn.add(contacts, record(json!({}))).await.unwrap(), Key::Int(51));
}

#[tokio::test]
async fn test_int_and_string_keys_are_distinct() {
    let schema = DatabaseSchema::new("keys", 1).store(StoreSchema::new("s", "id"));
    let conn = SqliteEngine::in_memory().open(&schema).await.unwrap();
    let s = schema.store_schema("s").unwrap();

    conn.add(s, record(json!({"id": 1, "kind": "int"}))).await.unwrap();
    conn.add(s, record(json!({"id": "1", "kind": "text"}))).await.unwrap();
    conn.add(s, record(json!({"id": "a"}))).await.unwrap();
    conn.add(s, record(json!({"id": -4}))).await.unwrap();

    assert_eq!(
        conn.keys(s).await.unwrap(),
        vec![Key::Int(-4), Key::Int(1), Key::from("1"), Key::from("a")]
    );
    assert_eq!(conn.get(s, &Key::Int(1)).await.unwrap().unwrap()["kind"], json!("int"));
}

#[tokio::test]
async fn test_unique_index_rejects_second_holder() {
    let schema = ledger(1);
    let conn = SqliteEngine::in_memory().open(&schema).await.unwrap();
    let contacts = schema.store_schema("contacts").unwrap();

    let id = conn.add(contacts, record(json!({"email": "a@x"}))).await.unwrap();
    let err = conn.add(contacts, record(json!({"email": "a@x"}))).await.unwrap_err();
    assert_eq!(
        err,
        StoreError::Constraint { store: "contacts".into(), index: "email".into() }
    );

    // The holder itself may be rewritten.
    let mut same = record(json!({"email": "a@x", "name": "renamed"}));
    same.insert("id".into(), id.to_value());
    conn.put(contacts, same).await.unwrap();
    assert_eq!(conn.count(contacts).await.unwrap(), 1);
}

#[tokio::test]
async fn test_clear_removes_everything() {
    let schema = ledger(1);
    let conn = SqliteEngine::in_memory().open(&schema).await.unwrap();
    let tags = schema.store_schema("tags").unwrap();

    for slug in ["a", "b", "c"] {
        conn.add(tags, record(json!({"slug": slug}))).await.unwrap();
    }
    conn.clear(tags).await.unwrap();

    assert!(conn.get_all(tags).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_closed_connection_is_unavailable() {
    let schema = ledger(1);
    let conn = SqliteEngine::in_memory().open(&schema).await.unwrap();
    conn.close();

    let err = conn.get_all(schema.store_schema("tags").unwrap()).await.unwrap_err();
    assert_eq!(err.kind().as_str(), "EngineUnavailable");
}

#[tokio::test]
async fn test_reopen_keeps_data() {
    let dir = tempfile::tempdir().unwrap();
    let engine = SqliteEngine::new(dir.path());

    let first = LocalStore::new(ledger(1), engine.clone(), MemoryKv::new()).unwrap();
    let id = first.add("contacts", record(json!({"name": "Ada"}))).await.unwrap();
    first.close();

    assert!(dir.path().join("ContactLedgerDB.sqlite3").exists());

    let second = LocalStore::new(ledger(1), engine, MemoryKv::new()).unwrap();
    let stored = second.get("contacts", id).await.unwrap().unwrap();
    assert_eq!(stored["name"], json!("Ada"));
    assert!(!second.is_degraded());
}

#[tokio::test]
async fn test_upgrade_adds_store_and_keeps_rows() {
    let dir = tempfile::tempdir().unwrap();
    let engine = SqliteEngine::new(dir.path());

    let v1 = LocalStore::new(ledger(1), engine.clone(), MemoryKv::new()).unwrap();
    v1.add("tags", record(json!({"slug": "kept"}))).await.unwrap();
    v1.close();

    let v2_schema = ledger(2).store(StoreSchema::new("notes", "id").auto_increment());
    let v2 = LocalStore::new(v2_schema, engine, MemoryKv::new()).unwrap();

    assert!(v2.get("tags", "kept").await.unwrap().is_some());
    assert_eq!(v2.add("notes", record(json!({"text": "hi"}))).await.unwrap(), Key::Int(1));
}

#[tokio::test]
async fn test_older_schema_degrades_to_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let engine = SqliteEngine::new(dir.path());

    LocalStore::new(ledger(3), engine.clone(), MemoryKv::new())
        .unwrap()
        .init()
        .await;

    let old = LocalStore::new(ledger(2), engine, MemoryKv::new()).unwrap();
    old.add("tags", record(json!({"slug": "x"}))).await.unwrap();

    assert!(old.is_degraded());
    assert!(old.degraded_reason().unwrap().contains("version 3"));
    assert_eq!(old.fallback().kv().item_names(), vec!["ContactLedgerDB:tags".to_string()]);
}

#[tokio::test]
async fn test_unwritable_location_degrades() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"file").unwrap();

    let store = LocalStore::new(ledger(1), SqliteEngine::new(&blocker), MemoryKv::new()).unwrap();
    store.add("tags", record(json!({"slug": "x"}))).await.unwrap();

    assert!(store.is_degraded());
    assert_eq!(store.get_all("tags").await.unwrap().len(), 1);
}
