//! Record and key model
//!
//! A record is an opaque JSON object. Its primary key lives at the store's key
//! path, which may be dotted (`"meta.id"`) to address a nested field.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{StoreError, StoreResult};
use crate::schema::{IndexSchema, StoreSchema};

/// A stored record: a JSON object keyed by field name.
pub type Record = Map<String, Value>;

/// Field stamped with the insert time by `add`.
pub const CREATED_AT: &str = "createdAt";

/// Field stamped with the write time by `add` and `update`.
pub const UPDATED_AT: &str = "updatedAt";

/// A primary key value.
///
/// Ordering follows the browser engine: every number sorts before every string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Int(i64),
    Text(String),
}

impl Key {
    /// Convert a JSON value into a key, if it is a valid one.
    ///
    /// Integers (including floats with no fractional part) and strings are keys;
    /// everything else is not.
    pub fn from_value(value: &Value) -> Option<Key> {
        match value {
            Value::String(s) => Some(Key::Text(s.clone())),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Key::Int(i))
                } else {
                    let f = n.as_f64()?;
                    if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                        Some(Key::Int(f as i64))
                    } else {
                        None
                    }
                }
            }
            _ => None,
        }
    }

    /// Like [`Key::from_value`] but reports why the value was rejected.
    pub fn try_from_value(value: &Value) -> StoreResult<Key> {
        Key::from_value(value)
            .ok_or_else(|| StoreError::InvalidKey(format!("{} is not a valid key", value)))
    }

    /// The JSON form of this key.
    pub fn to_value(&self) -> Value {
        match self {
            Key::Int(i) => Value::from(*i),
            Key::Text(s) => Value::String(s.clone()),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Key::Int(i) => Some(*i),
            Key::Text(_) => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(i) => write!(f, "{}", i),
            Key::Text(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<i64> for Key {
    fn from(i: i64) -> Self {
        Key::Int(i)
    }
}

impl From<i32> for Key {
    fn from(i: i32) -> Self {
        Key::Int(i64::from(i))
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Text(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Text(s)
    }
}

/// Resolve a (possibly dotted) path inside a record.
pub fn resolve_path<'a>(record: &'a Record, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = record.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Set a (possibly dotted) path inside a record, creating intermediate objects.
///
/// Fails if an intermediate segment exists and is not an object.
pub fn set_path(record: &mut Record, path: &str, value: Value) -> StoreResult<()> {
    let segments: Vec<&str> = path.split('.').collect();
    let (last, parents) = segments
        .split_last()
        .ok_or_else(|| StoreError::InvalidKey("empty key path".into()))?;

    let mut current = record;
    for segment in parents {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        current = entry.as_object_mut().ok_or_else(|| {
            StoreError::InvalidKey(format!("'{}' in key path '{}' is not an object", segment, path))
        })?;
    }
    current.insert(last.to_string(), value);
    Ok(())
}

/// Extract the primary key of a record.
///
/// Returns `Ok(None)` when the key path is absent, and an error when it is present
/// but holds something that cannot be a key.
pub fn key_of(record: &Record, key_path: &str) -> StoreResult<Option<Key>> {
    match resolve_path(record, key_path) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => Key::try_from_value(value).map(Some),
    }
}

/// JSON equality where numbers compare by value (`5 == 5.0`).
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64().partial_cmp(&y.as_f64()) == Some(Ordering::Equal),
        },
        _ => a == b,
    }
}

/// Whether the record's value at `field` equals `value`.
pub fn field_matches(record: &Record, field: &str, value: &Value) -> bool {
    resolve_path(record, field).is_some_and(|v| values_equal(v, value))
}

/// Whether a value can be stored in (and queried from) an index.
pub fn is_indexable(value: &Value) -> bool {
    matches!(value, Value::Number(_) | Value::String(_))
}

/// First unique index of `store` on which `record` collides with a record
/// stored under a different key.
pub(crate) fn unique_violation<'a>(
    store: &'a StoreSchema,
    record: &Record,
    key: &Key,
    others: &[&Record],
) -> Option<&'a IndexSchema> {
    store.unique_indexes().find(|index| {
        let Some(value) = resolve_path(record, &index.field).filter(|v| is_indexable(v)) else {
            return false;
        };
        others.iter().any(|other| {
            key_of(other, &store.key_path).ok().flatten().as_ref() != Some(key)
                && field_matches(other, &index.field, value)
        })
    })
}

/// Current time in the stamp format (RFC 3339, UTC, millisecond precision).
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Stamp `createdAt` and `updatedAt` for an insert.
pub fn stamp_created(record: &mut Record) {
    let now = now_timestamp();
    record.insert(CREATED_AT.to_string(), Value::String(now.clone()));
    record.insert(UPDATED_AT.to_string(), Value::String(now));
}

/// Stamp a fresh `updatedAt`, leaving `createdAt` untouched.
pub fn stamp_updated(record: &mut Record) {
    record.insert(UPDATED_AT.to_string(), Value::String(now_timestamp()));
}

/// Convert an arbitrary JSON value into a record.
pub fn record_from_value(value: Value) -> StoreResult<Record> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Serialization(format!(
            "expected a JSON object, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        record_from_value(value).unwrap()
    }

    #[test]
    fn test_key_from_value() {
        assert_eq!(Key::from_value(&json!(7)), Some(Key::Int(7)));
        assert_eq!(Key::from_value(&json!(7.0)), Some(Key::Int(7)));
        assert_eq!(Key::from_value(&json!("a")), Some(Key::Text("a".into())));
        assert_eq!(Key::from_value(&json!(1.5)), None);
        assert_eq!(Key::from_value(&json!(true)), None);
        assert_eq!(Key::from_value(&json!(null)), None);
        assert_eq!(Key::from_value(&json!([1])), None);
    }

    #[test]
    fn test_key_order_numbers_before_strings() {
        let mut keys = vec![Key::from("b"), Key::Int(10), Key::from("a"), Key::Int(-3)];
        keys.sort();
        assert_eq!(
            keys,
            vec![Key::Int(-3), Key::Int(10), Key::from("a"), Key::from("b")]
        );
    }

    #[test]
    fn test_key_serde_is_untagged() {
        assert_eq!(serde_json::to_string(&Key::Int(3)).unwrap(), "3");
        assert_eq!(serde_json::to_string(&Key::from("x")).unwrap(), "\"x\"");
        let key: Key = serde_json::from_str("\"x\"").unwrap();
        assert_eq!(key, Key::from("x"));
    }

    #[test]
    fn test_resolve_nested_path() {
        let r = record(json!({"id": 1, "meta": {"owner": {"name": "A"}}}));
        assert_eq!(resolve_path(&r, "meta.owner.name"), Some(&json!("A")));
        assert_eq!(resolve_path(&r, "meta.missing"), None);
        assert_eq!(resolve_path(&r, "id.deeper"), None);
    }

    #[test]
    fn test_set_path_creates_parents() {
        let mut r = Record::new();
        set_path(&mut r, "meta.id", json!(4)).unwrap();
        assert_eq!(Value::Object(r), json!({"meta": {"id": 4}}));
    }

    #[test]
    fn test_set_path_through_scalar_fails() {
        let mut r = record(json!({"meta": 1}));
        let err = set_path(&mut r, "meta.id", json!(4)).unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
    }

    #[test]
    fn test_key_of() {
        assert_eq!(key_of(&record(json!({"id": 2})), "id").unwrap(), Some(Key::Int(2)));
        assert_eq!(key_of(&record(json!({"name": "x"})), "id").unwrap(), None);
        assert_eq!(key_of(&record(json!({"id": null})), "id").unwrap(), None);
        assert!(key_of(&record(json!({"id": {"a": 1}})), "id").is_err());
    }

    #[test]
    fn test_values_equal_numeric() {
        assert!(values_equal(&json!(5), &json!(5.0)));
        assert!(!values_equal(&json!(5), &json!("5")));
        assert!(values_equal(&json!("x"), &json!("x")));
    }

    #[test]
    fn test_unique_violation_ignores_same_key() {
        let store = StoreSchema::new("users", "id").unique_index("email", "email");
        let existing = record(json!({"id": 1, "email": "a@x"}));
        let others = vec![&existing];

        let same = record(json!({"id": 1, "email": "a@x"}));
        assert!(unique_violation(&store, &same, &Key::Int(1), &others).is_none());

        let clash = record(json!({"id": 2, "email": "a@x"}));
        let index = unique_violation(&store, &clash, &Key::Int(2), &others).unwrap();
        assert_eq!(index.name, "email");

        let missing = record(json!({"id": 3}));
        assert!(unique_violation(&store, &missing, &Key::Int(3), &others).is_none());
    }

    #[test]
    fn test_stamps() {
        let mut r = record(json!({"id": 1}));
        stamp_created(&mut r);
        let created = r.get(CREATED_AT).cloned().unwrap();
        assert_eq!(r.get(UPDATED_AT), Some(&created));
        assert!(created.as_str().unwrap().ends_with('Z'));

        stamp_updated(&mut r);
        assert_eq!(r.get(CREATED_AT), Some(&created));
        assert!(r.contains_key(UPDATED_AT));
    }
}
