//! Domain newtypes with validation
//!
//! This module provides strongly-typed wrappers for domain identifiers.
//! Each newtype ensures data validity at construction time.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::errors::DomainError;

// ============================================================================
// SessionId
// ============================================================================

/// Identifier for a sync session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new random SessionId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID value
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DomainError::InvalidId(format!("Invalid SessionId: {e}")))
    }
}

// ============================================================================
// RecordId
// ============================================================================

/// Stable identifier of a record inside one collection
///
/// Remote stores disagree on id types (the push store keys records by
/// string, the pull store often uses integer primary keys), so ids are
/// normalized to their trimmed string form. `1` and `"1"` are the same id.
///
/// Ids are used as path segments on the push remote, so `/` and the
/// characters the tree store reserves (`.`, `#`, `$`, `[`, `]`) are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecordId(String);

/// Characters that cannot appear in a record id
const RESERVED_ID_CHARS: &[char] = &['/', '.', '#', '$', '[', ']'];

impl RecordId {
    /// Create a new RecordId
    ///
    /// # Errors
    /// Returns error if the id is blank or contains reserved characters
    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();
        let trimmed = id.trim();

        if trimmed.is_empty() {
            return Err(DomainError::InvalidRecordId(
                "Record ID cannot be empty".to_string(),
            ));
        }

        if trimmed.contains(RESERVED_ID_CHARS) {
            return Err(DomainError::InvalidRecordId(format!(
                "Record ID contains reserved characters: {trimmed}"
            )));
        }

        Ok(Self(trimmed.to_string()))
    }

    /// Generate a fresh collision-resistant id (UUID v4, simple form)
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Derive a stable id from free text such as a category name
    ///
    /// Reserved characters and whitespace become `-`. Text with nothing
    /// usable left maps to its UUID v5, so the same text always yields the
    /// same id.
    #[must_use]
    pub fn derive(text: &str) -> Self {
        let sanitized: String = text
            .trim()
            .chars()
            .map(|c| {
                if RESERVED_ID_CHARS.contains(&c) || c.is_whitespace() {
                    '-'
                } else {
                    c
                }
            })
            .collect();
        match Self::new(sanitized.trim_matches('-')) {
            Ok(id) => id,
            Err(_) => Self(
                Uuid::new_v5(&Uuid::NAMESPACE_OID, text.as_bytes())
                    .simple()
                    .to_string(),
            ),
        }
    }

    /// Read an id out of a JSON value (string or integer)
    ///
    /// Returns `None` for null, blank strings, floats, and every other type.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Self::new(s.as_str()).ok(),
            Value::Number(n) if n.is_i64() || n.is_u64() => Self::new(n.to_string()).ok(),
            _ => None,
        }
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for RecordId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<RecordId> for String {
    fn from(id: RecordId) -> Self {
        id.0
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    mod session_id_tests {
        use super::*;

        #[test]
        fn test_new_creates_unique_ids() {
            assert_ne!(SessionId::new(), SessionId::new());
        }

        #[test]
        fn test_from_str() {
            let uuid_str = "550e8400-e29b-41d4-a716-446655440000";
            let id: SessionId = uuid_str.parse().unwrap();
            assert_eq!(id.to_string(), uuid_str);
        }

        #[test]
        fn test_from_str_invalid() {
            let result: Result<SessionId, _> = "not-a-uuid".parse();
            assert!(result.is_err());
        }
    }

    mod record_id_tests {
        use super::*;

        #[test]
        fn test_valid_ids_are_trimmed() {
            let id = RecordId::new("  p-001 ").unwrap();
            assert_eq!(id.as_str(), "p-001");
        }

        #[test]
        fn test_empty_is_rejected() {
            assert!(RecordId::new("").is_err());
            assert!(RecordId::new("   ").is_err());
        }

        #[test]
        fn test_derive_is_stable() {
            assert_eq!(RecordId::derive("Snacks/Chips").as_str(), "Snacks-Chips");
            assert_eq!(RecordId::derive(" Kopi . Teh ").as_str(), "Kopi---Teh");
            assert_eq!(RecordId::derive("./#"), RecordId::derive("./#"));
            assert_ne!(RecordId::derive("./#"), RecordId::derive("$[]"));
        }

        #[test]
        fn test_reserved_characters_are_rejected() {
            assert!(RecordId::new("a/b").is_err());
            assert!(RecordId::new("a.b").is_err());
            assert!(RecordId::new("a#b").is_err());
            assert!(RecordId::new("$a").is_err());
        }

        #[test]
        fn test_generate_is_valid_and_unique() {
            let a = RecordId::generate();
            let b = RecordId::generate();
            assert_ne!(a, b);
            assert!(RecordId::new(a.as_str()).is_ok());
        }

        #[test]
        fn test_from_json_normalizes_numbers_and_strings() {
            assert_eq!(RecordId::from_json(&json!(1)), RecordId::new("1").ok());
            assert_eq!(RecordId::from_json(&json!("1")), RecordId::new("1").ok());
            assert_eq!(RecordId::from_json(&json!(" x ")), RecordId::new("x").ok());
        }

        #[test]
        fn test_from_json_rejects_other_types() {
            assert!(RecordId::from_json(&json!(null)).is_none());
            assert!(RecordId::from_json(&json!(1.5)).is_none());
            assert!(RecordId::from_json(&json!(true)).is_none());
            assert!(RecordId::from_json(&json!("")).is_none());
        }

        #[test]
        fn test_serde_rejects_invalid() {
            let parsed: Result<RecordId, _> = serde_json::from_str("\"a/b\"");
            assert!(parsed.is_err());

            let parsed: RecordId = serde_json::from_str("\"abc\"").unwrap();
            assert_eq!(parsed.as_str(), "abc");
        }
    }
}
