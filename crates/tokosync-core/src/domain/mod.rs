//! Domain entities and business rules
//!
//! This module contains the core domain types for Tokosync:
//! - Newtypes for type-safe identifiers
//! - Records and the remote snapshots they are merged from
//! - The collection catalog with its per-collection sync policy
//! - Domain-specific error types

pub mod collection;
pub mod errors;
pub mod newtypes;
pub mod record;

// Re-export commonly used types
pub use collection::{
    Catalog, Collection, CollectionDef, CollectionKind, IdentityKeySet, MergePolicy, WriteBinding,
};
pub use errors::DomainError;
pub use newtypes::*;
pub use record::{Channel, Record, RemoteEntry, RemoteSnapshot, ID_FIELD};
