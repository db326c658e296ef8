//! Tokosync Core - Domain logic and reconciliation rules
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `Record`, `Collection`, `RemoteSnapshot`, `RecordId`
//! - **Policy table** - per-collection merge policy, identity keys and remote bindings
//! - **Pure transforms** - `RecordTransformer` (wire shape to local shape) and
//!   `IdentityMatcher` (does a remote record already exist locally?)
//! - **Port definitions** - Traits for adapters: `ICollectionStore`,
//!   `IRestoreMarkerStore`, `IPushRemote`, `IPullRemote`
//!
//! # Architecture
//!
//! The domain module holds pure data and rules with no I/O. Ports define the
//! trait interfaces that the engine depends on and adapter crates implement.

pub mod config;
pub mod domain;
pub mod identity;
pub mod ports;
pub mod transform;
