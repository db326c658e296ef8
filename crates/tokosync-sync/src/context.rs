//! Session-scoped shared state
//!
//! Everything the controllers and the gateway share lives in one
//! [`SyncContext`], built when a session starts and dropped with it. Nothing
//! here is process-global.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use tokosync_core::domain::{Catalog, Collection, CollectionDef};
use tokosync_core::ports::ICollectionStore;
use tokosync_core::transform::RecordTransformer;

use crate::pending::PendingWrites;
use crate::restore_guard::{Clock, RestoreGuard};
use crate::status::SyncStatusAggregator;
use crate::SyncError;

/// Shared, constructor-injected state of one sync session
#[derive(Clone)]
pub struct SyncContext {
    pub store: Arc<dyn ICollectionStore>,
    pub guard: Arc<RestoreGuard>,
    pub status: Arc<SyncStatusAggregator>,
    pub pending: PendingWrites,
    pub catalog: Arc<Catalog>,
    pub clock: Arc<dyn Clock>,
    pub transformer: RecordTransformer,
    /// Fired on teardown
    pub cancel: CancellationToken,
}

impl SyncContext {
    /// Returns true once the session has been torn down
    ///
    /// Work that finishes after this point must not write local state.
    pub fn is_torn_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Looks up a collection's policy
    pub fn def(&self, collection: Collection) -> Result<&CollectionDef, SyncError> {
        self.catalog
            .get(collection)
            .ok_or(SyncError::UnknownCollection(collection))
    }
}
