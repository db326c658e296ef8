//! Records and remote snapshots
//!
//! A [`Record`] is the local, domain-shaped form of one item in a
//! collection. It is a JSON object: the engine does not own the business
//! schema, only the handful of fields it needs for identity matching.
//!
//! A [`RemoteSnapshot`] is the transient, point-in-time set of raw records
//! one remote produced for one collection. It is consumed by a merge and
//! then discarded.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::collection::Collection;
use super::errors::DomainError;
use super::newtypes::RecordId;

/// Field holding a record's primary identifier
pub const ID_FIELD: &str = "id";

// ============================================================================
// Record
// ============================================================================

/// A domain-shaped record owned by the local collection store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Creates an empty record
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Wraps an existing JSON object
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Converts a JSON value into a record
    ///
    /// # Errors
    /// Returns [`DomainError::NotAnObject`] if `value` is not a JSON object
    pub fn from_value(collection: Collection, value: Value) -> Result<Self, DomainError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(DomainError::NotAnObject {
                collection: collection.to_string(),
                found: json_type_name(&other).to_string(),
            }),
        }
    }

    /// The record's primary id, if it has a usable one
    pub fn id(&self) -> Option<RecordId> {
        self.0.get(ID_FIELD).and_then(RecordId::from_json)
    }

    /// Sets the primary id
    pub fn set_id(&mut self, id: &RecordId) {
        self.0
            .insert(ID_FIELD.to_string(), Value::String(id.as_str().to_string()));
    }

    /// Returns a field value, treating JSON `null` as absent
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field).filter(|v| !v.is_null())
    }

    /// Returns a field as a string slice, if it is a string
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    /// Sets a field
    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    /// Removes a field
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.shift_remove(field)
    }

    /// Applies a shallow patch. The primary id is never overwritten.
    pub fn apply_patch(&mut self, patch: &Map<String, Value>) {
        for (field, value) in patch {
            if field == ID_FIELD {
                continue;
            }
            self.0.insert(field.clone(), value.clone());
        }
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the record has no fields
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrows the underlying JSON object
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Clones the record into a JSON value
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// Consumes the record into a JSON value
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Human-readable JSON type name, for error messages
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// Channel
// ============================================================================

/// Which remote produced a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// The streaming, subscription-based remote
    Push,
    /// The query-only remote
    Pull,
}

impl Display for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Push => write!(f, "push"),
            Channel::Pull => write!(f, "pull"),
        }
    }
}

// ============================================================================
// RemoteEntry / RemoteSnapshot
// ============================================================================

/// One raw record as it arrived from a remote
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEntry {
    /// Key the remote stores the record under (push remote only)
    pub key: Option<String>,
    /// Raw wire-shaped value
    pub value: Value,
}

impl RemoteEntry {
    /// Creates an entry with a remote key
    pub fn keyed(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: Some(key.into()),
            value,
        }
    }

    /// Creates an entry without a remote key
    pub fn unkeyed(value: Value) -> Self {
        Self { key: None, value }
    }

    /// Identifier to address this record on the remote: its key, else its `id` field
    pub fn remote_id(&self) -> Option<String> {
        self.key.clone().or_else(|| {
            self.value
                .get(ID_FIELD)
                .and_then(RecordId::from_json)
                .map(String::from)
        })
    }
}

/// Point-in-time set of raw records from one remote for one collection
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSnapshot {
    /// Collection the snapshot belongs to
    pub collection: Collection,
    /// Remote that produced it
    pub channel: Channel,
    /// Raw entries in the order the remote delivered them
    pub entries: Vec<RemoteEntry>,
}

impl RemoteSnapshot {
    /// Builds a snapshot from the raw value a push subscription delivered
    ///
    /// The push store holds a collection either as an object keyed by record
    /// key or as an array (index keys). `null`, a missing value, `{}` and `[]`
    /// all yield an empty snapshot; `null` children are dropped.
    pub fn from_push(collection: Collection, raw: Option<Value>) -> Self {
        let entries = match raw {
            Some(Value::Object(map)) => map
                .into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| RemoteEntry::keyed(k, v))
                .collect(),
            Some(Value::Array(items)) => items
                .into_iter()
                .enumerate()
                .filter(|(_, v)| !v.is_null())
                .map(|(i, v)| RemoteEntry::keyed(i.to_string(), v))
                .collect(),
            _ => Vec::new(),
        };

        Self {
            collection,
            channel: Channel::Push,
            entries,
        }
    }

    /// Builds a snapshot from the rows a pull query returned
    pub fn from_pull(collection: Collection, rows: Vec<Value>) -> Self {
        Self {
            collection,
            channel: Channel::Pull,
            entries: rows
                .into_iter()
                .filter(|v| !v.is_null())
                .map(RemoteEntry::unkeyed)
                .collect(),
        }
    }

    /// Returns true if the snapshot carries no records
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of raw entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_from_value_requires_object() {
        let ok = Record::from_value(Collection::Products, json!({"id": 1}));
        assert!(ok.is_ok());

        let err = Record::from_value(Collection::Products, json!([1, 2])).unwrap_err();
        assert!(matches!(err, DomainError::NotAnObject { .. }));
    }

    #[test]
    fn test_record_id_and_nulls() {
        let record = Record::from_value(
            Collection::Products,
            json!({"id": 7, "sku": null, "name": "Kopi"}),
        )
        .unwrap();

        assert_eq!(record.id().unwrap().as_str(), "7");
        assert!(record.get("sku").is_none());
        assert_eq!(record.get_str("name"), Some("Kopi"));
    }

    #[test]
    fn test_apply_patch_keeps_id() {
        let mut record =
            Record::from_value(Collection::Customers, json!({"id": "c1", "name": "Ani"})).unwrap();
        let patch = json!({"id": "other", "name": "Ani S", "phone": "0812"});
        record.apply_patch(patch.as_object().unwrap());

        assert_eq!(record.id().unwrap().as_str(), "c1");
        assert_eq!(record.get_str("name"), Some("Ani S"));
        assert_eq!(record.get_str("phone"), Some("0812"));
    }

    #[test]
    fn test_push_snapshot_from_object_keeps_order() {
        let raw = json!({
            "zz": {"name": "first"},
            "aa": {"name": "second"},
            "mm": null
        });
        let snapshot = RemoteSnapshot::from_push(Collection::Suppliers, Some(raw));

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.entries[0].key.as_deref(), Some("zz"));
        assert_eq!(snapshot.entries[1].key.as_deref(), Some("aa"));
    }

    #[test]
    fn test_push_snapshot_from_array_uses_indexes() {
        let raw = json!([null, {"name": "a"}, {"name": "b"}]);
        let snapshot = RemoteSnapshot::from_push(Collection::Products, Some(raw));

        let keys: Vec<_> = snapshot
            .entries
            .iter()
            .map(|e| e.key.clone().unwrap())
            .collect();
        assert_eq!(keys, vec!["1", "2"]);
    }

    #[test]
    fn test_push_snapshot_empty_forms() {
        for raw in [None, Some(json!(null)), Some(json!({})), Some(json!([]))] {
            let snapshot = RemoteSnapshot::from_push(Collection::Customers, raw);
            assert!(snapshot.is_empty());
            assert_eq!(snapshot.channel, Channel::Push);
        }
    }

    #[test]
    fn test_remote_id_prefers_key() {
        let entry = RemoteEntry::keyed("k1", json!({"id": 5}));
        assert_eq!(entry.remote_id().as_deref(), Some("k1"));

        let entry = RemoteEntry::unkeyed(json!({"id": 5}));
        assert_eq!(entry.remote_id().as_deref(), Some("5"));

        let entry = RemoteEntry::unkeyed(json!({"name": "x"}));
        assert!(entry.remote_id().is_none());
    }
}
