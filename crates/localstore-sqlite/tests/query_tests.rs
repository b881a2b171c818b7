//! Index query tests for SqliteEngine

use localstore_core::{Connection, DatabaseSchema, Engine, Record, StoreSchema};
use localstore_sqlite::{SqliteConnection, SqliteEngine};
use serde_json::{json, Value};

fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("not an object: {}", other),
    }
}

fn schema() -> DatabaseSchema {
    DatabaseSchema::new("Study", 1).store(
        StoreSchema::new("lessons", "id")
            .auto_increment()
            .index("dueDate", "dueDate")
            .index("score", "score")
            .index("owner", "meta.owner"),
    )
}

/// Helper to open a connection with a few lessons
async fn seeded() -> (DatabaseSchema, SqliteConnection) {
    let schema = schema();
    let conn = SqliteEngine::in_memory().open(&schema).await.unwrap();
    let lessons = schema.store_schema("lessons").unwrap();

    for lesson in [
        json!({"title": "a", "dueDate": "2024-01-01", "score": 5, "meta": {"owner": "ana"}}),
        json!({"title": "b", "dueDate": "2024-01-02", "score": 5.0, "meta": {"owner": "bo"}}),
        json!({"title": "c", "dueDate": "2024-01-01", "score": "5"}),
        json!({"title": "d", "score": true}),
        json!({"title": "e", "score": 1}),
    ] {
        conn.add(lessons, record(lesson)).await.unwrap();
    }
    (schema, conn)
}

fn titles(records: &[Record]) -> Vec<&str> {
    records.iter().map(|r| r["title"].as_str().unwrap()).collect()
}

#[tokio::test]
async fn test_query_by_string_field() {
    let (schema, conn) = seeded().await;
    let lessons = schema.store_schema("lessons").unwrap();
    let index = lessons.index_schema("dueDate").unwrap();

    let result = conn.get_by_index(lessons, index, &json!("2024-01-01")).await.unwrap();
    assert_eq!(titles(&result), vec!["a", "c"]);
}

#[tokio::test]
async fn test_query_numbers_compare_by_value() {
    let (schema, conn) = seeded().await;
    let lessons = schema.store_schema("lessons").unwrap();
    let index = lessons.index_schema("score").unwrap();

    let result = conn.get_by_index(lessons, index, &json!(5)).await.unwrap();
    assert_eq!(titles(&result), vec!["a", "b"]);
}

#[tokio::test]
async fn test_query_does_not_match_booleans() {
    let (schema, conn) = seeded().await;
    let lessons = schema.store_schema("lessons").unwrap();
    let index = lessons.index_schema("score").unwrap();

    let result = conn.get_by_index(lessons, index, &json!(1)).await.unwrap();
    assert_eq!(titles(&result), vec!["e"]);
}

#[tokio::test]
async fn test_query_nested_field() {
    let (schema, conn) = seeded().await;
    let lessons = schema.store_schema("lessons").unwrap();
    let index = lessons.index_schema("owner").unwrap();

    let result = conn.get_by_index(lessons, index, &json!("bo")).await.unwrap();
    assert_eq!(titles(&result), vec!["b"]);
}

#[tokio::test]
async fn test_query_no_match_is_empty() {
    let (schema, conn) = seeded().await;
    let lessons = schema.store_schema("lessons").unwrap();
    let index = lessons.index_schema("dueDate").unwrap();

    assert!(conn.get_by_index(lessons, index, &json!("1999-01-01")).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_index_missing_from_file_is_schema_mismatch() {
    let (schema, conn) = seeded().await;
    let drifted = schema
        .store_schema("lessons")
        .unwrap()
        .clone()
        .index("title", "title");
    let index = drifted.index_schema("title").unwrap();

    let err = conn.get_by_index(&drifted, index, &json!("a")).await.unwrap_err();
    assert_eq!(err.kind().as_str(), "SchemaMismatch");
}

#[tokio::test]
async fn test_get_all_in_key_order() {
    let (schema, conn) = seeded().await;
    let lessons = schema.store_schema("lessons").unwrap();

    let all = conn.get_all(lessons).await.unwrap();
    assert_eq!(titles(&all), vec!["a", "b", "c", "d", "e"]);
    assert_eq!(conn.store_names().unwrap(), vec!["lessons".to_string()]);
}
