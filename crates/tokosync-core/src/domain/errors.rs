//! Domain error types
//!
//! This module defines error types specific to domain operations,
//! including identifier validation and record shape failures.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Unknown collection name
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    /// Invalid record identifier
    #[error("Invalid record ID: {0}")]
    InvalidRecordId(String),

    /// A remote record is not a JSON object
    #[error("Record in {collection} is not an object: {found}")]
    NotAnObject {
        /// Collection the record belongs to
        collection: String,
        /// JSON type that was found instead
        found: String,
    },

    /// A remote record lacks a field the local shape requires
    #[error("Record in {collection} is missing required field '{field}'")]
    MissingField {
        /// Collection the record belongs to
        collection: String,
        /// The required field
        field: String,
    },

    /// ID parsing error
    #[error("Invalid ID format: {0}")]
    InvalidId(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DomainError::UnknownCollection("widgets".to_string());
        assert_eq!(err.to_string(), "Unknown collection: widgets");

        let err = DomainError::MissingField {
            collection: "products".to_string(),
            field: "name".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Record in products is missing required field 'name'"
        );

        let err = DomainError::NotAnObject {
            collection: "customers".to_string(),
            found: "number".to_string(),
        };
        assert_eq!(err.to_string(), "Record in customers is not an object: number");
    }

    #[test]
    fn test_error_equality() {
        let err1 = DomainError::InvalidRecordId("a/b".to_string());
        let err2 = DomainError::InvalidRecordId("a/b".to_string());
        let err3 = DomainError::InvalidRecordId("c".to_string());

        assert_eq!(err1, err2);
        assert_ne!(err1, err3);
    }
}
