//! Tokosync Sync - Dual-channel synchronization engine
//!
//! Keeps the local collection store consistent with two remotes:
//! - a **push** remote that streams full snapshots to subscribers
//! - a **pull** remote that is polled on a fixed interval
//!
//! ## Modules
//!
//! - [`restore_guard`] - Time-windowed suppression after a backup restore
//! - [`dedup`] - Duplicate collapsing for push snapshots
//! - [`push`] - One subscription task per collection, policy-driven merge
//! - [`pull`] - Periodic additive merge with an in-flight guard
//! - [`gateway`] - Optimistic local-first writes forwarded to the remotes
//! - [`pending`] - Ledger of writes awaiting remote confirmation
//! - [`status`] - `connected` / `syncing` / `last_sync_time` read model
//! - [`engine`] - Session lifecycle: start, teardown
//! - `memory` - In-memory port implementations for tests (`test-util` feature)

pub mod context;
pub mod dedup;
pub mod engine;
pub mod gateway;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod pending;
pub mod pull;
pub mod push;
pub mod restore_guard;
pub mod status;

pub use context::SyncContext;
pub use engine::{EngineSettings, SyncEngine, SyncSession};
pub use gateway::{RemoteOutcome, WriteReceipt, WriteThroughGateway};
pub use pull::{PassOutcome, PullSyncController};
pub use push::{MergeOutcome, PushSyncController};
pub use restore_guard::{Clock, RestoreGuard, SystemClock};
pub use status::{SyncStatus, SyncStatusAggregator};

use thiserror::Error;
use tokosync_core::domain::{Collection, DomainError, RecordId};

/// Errors that can occur during synchronization operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// The collection is not in the catalog
    #[error("Unknown collection: {0}")]
    UnknownCollection(Collection),

    /// The collection does not accept local mutations
    #[error("Collection is read-only: {0}")]
    ReadOnlyCollection(Collection),

    /// No local record has the given id
    #[error("Record not found in {collection}: {id}")]
    RecordNotFound {
        /// Collection that was searched
        collection: Collection,
        /// Id that was not found
        id: RecordId,
    },

    /// The payload of a write is not usable
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// The local store failed
    #[error("Local store error: {0}")]
    Store(#[source] anyhow::Error),

    /// A remote rejected or failed a request
    #[error("Remote error: {0}")]
    Remote(#[source] anyhow::Error),

    /// The engine could not be started
    #[error("Startup failed: {0}")]
    Startup(String),

    /// A domain-level error propagated from tokosync-core
    #[error("Domain error: {0}")]
    DomainError(#[from] DomainError),
}
