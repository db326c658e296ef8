//! Record identity matching
//!
//! A remote record "already exists locally" when any of its identity keys
//! (primary id first, then the collection's secondary keys such as SKU or
//! transaction code) equals the same key of some local record. Values are
//! compared in normalized form: trimmed strings, integers rendered as
//! strings. Absent, null and blank values never match.

use std::collections::HashSet;

use serde_json::Value;

use crate::domain::{IdentityKeySet, Record};

/// Normalizes one identity value for comparison
///
/// Returns `None` for values that cannot identify a record.
pub fn normalize_identity_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

/// Decides whether a record is already present in a set of local records
#[derive(Debug, Clone, Copy)]
pub struct IdentityMatcher {
    keys: IdentityKeySet,
}

impl IdentityMatcher {
    /// Creates a matcher over the given key set
    pub fn new(keys: IdentityKeySet) -> Self {
        Self { keys }
    }

    /// The key set this matcher compares
    pub fn keys(&self) -> IdentityKeySet {
        self.keys
    }

    /// Builds a lookup index over local records
    pub fn index<'a>(&self, records: impl IntoIterator<Item = &'a Record>) -> IdentityIndex {
        let mut index = IdentityIndex {
            keys: self.keys,
            seen: vec![HashSet::new(); self.keys.fields().len()],
        };
        for record in records {
            index.insert(record);
        }
        index
    }

    /// Returns true if `record` carries at least one usable identity value
    ///
    /// A record without one can never be matched, so it cannot be told
    /// apart from a copy of itself.
    pub fn identifies(&self, record: &Record) -> bool {
        self.keys
            .fields()
            .iter()
            .any(|field| record.get(field).and_then(normalize_identity_value).is_some())
    }
}

/// Set of identity values already present, one set per key field
#[derive(Debug, Clone)]
pub struct IdentityIndex {
    keys: IdentityKeySet,
    seen: Vec<HashSet<String>>,
}

impl IdentityIndex {
    /// Returns true if any identity key of `record` is already indexed
    pub fn contains(&self, record: &Record) -> bool {
        self.keys
            .fields()
            .iter()
            .zip(&self.seen)
            .any(|(field, seen)| {
                record
                    .get(field)
                    .and_then(normalize_identity_value)
                    .is_some_and(|v| seen.contains(&v))
            })
    }

    /// Adds a record's identity values to the index
    pub fn insert(&mut self, record: &Record) {
        for (field, seen) in self.keys.fields().iter().zip(self.seen.iter_mut()) {
            if let Some(value) = record.get(field).and_then(normalize_identity_value) {
                seen.insert(value);
            }
        }
    }
}
