//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the sync engine
//! depends on, but whose implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`ICollectionStore`] - Durable local storage of every collection
//! - [`IRestoreMarkerStore`] - Persistence of the last-restore timestamp
//! - [`IPushRemote`] - Streaming remote: subscriptions and full-record writes
//! - [`IPullRemote`] - Query-only remote: filtered reads and row writes

pub mod collection_store;
pub mod pull_remote;
pub mod push_remote;
pub mod restore_marker;

pub use collection_store::ICollectionStore;
pub use pull_remote::{IPullRemote, QueryFilter};
pub use push_remote::{IPushRemote, Subscription, SubscriptionHandle};
pub use restore_marker::IRestoreMarkerStore;
