//! Conversions between records/keys and SQLite values
//!
//! Each store row holds the key in an untyped `pk` column (integers stay INTEGER,
//! strings stay TEXT, so SQLite's own ordering puts numbers before strings)
//! and the whole record as JSON text in `body`.

use localstore_core::{Key, Record, StoreError};
use rusqlite::types::Value as SqlValue;
use serde_json::Value;

use crate::error::Result;

/// Serialize a record for the `body` column
pub fn record_to_sql(record: &Record) -> Result<String> {
    Ok(serde_json::to_string(record)?)
}

/// Deserialize a `body` column back into a record
pub fn sql_to_record(body: &str) -> Result<Record> {
    Ok(serde_json::from_str(body)?)
}

/// Bind a key to the `pk` column
pub fn key_to_sql(key: &Key) -> SqlValue {
    match key {
        Key::Int(i) => SqlValue::Integer(*i),
        Key::Text(s) => SqlValue::Text(s.clone()),
    }
}

/// Read the `pk` column
pub fn sql_to_key(value: SqlValue) -> Result<Key> {
    match value {
        SqlValue::Integer(i) => Ok(Key::Int(i)),
        SqlValue::Text(s) => Ok(Key::Text(s)),
        other => Err(StoreError::InvalidKey(format!("unexpected key column value {:?}", other)).into()),
    }
}

/// Bind an index lookup value. `None` for values no index can hold.
pub fn index_value_to_sql(value: &Value) -> Option<SqlValue> {
    match value {
        Value::String(s) => Some(SqlValue::Text(s.clone())),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Some(SqlValue::Integer(i)),
            None => n.as_f64().map(SqlValue::Real),
        },
        _ => None,
    }
}

/// `json_extract` expression for a (possibly dotted) field of `body`.
///
/// Field paths are restricted to identifier characters by schema validation,
/// so the path can be inlined; expression indexes only match literal paths.
pub fn field_expr(field: &str) -> String {
    format!("json_extract(body, '$.{}')", field)
}

/// Quote an identifier for SQL
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_round_trip_keeps_type() {
        assert_eq!(sql_to_key(key_to_sql(&Key::Int(4))).unwrap(), Key::Int(4));
        assert_eq!(sql_to_key(key_to_sql(&Key::from("4"))).unwrap(), Key::from("4"));
        assert!(sql_to_key(SqlValue::Null).is_err());
    }

    #[test]
    fn test_index_value_binding() {
        assert_eq!(index_value_to_sql(&json!(3)), Some(SqlValue::Integer(3)));
        assert_eq!(index_value_to_sql(&json!(2.5)), Some(SqlValue::Real(2.5)));
        assert_eq!(index_value_to_sql(&json!("x")), Some(SqlValue::Text("x".into())));
        assert_eq!(index_value_to_sql(&json!(true)), None);
        assert_eq!(index_value_to_sql(&json!(null)), None);
    }

    #[test]
    fn test_field_expr_nested() {
        assert_eq!(field_expr("meta.owner"), "json_extract(body, '$.meta.owner')");
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("store_contacts"), "\"store_contacts\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }
}
