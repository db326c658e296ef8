//! Ledger of optimistic writes awaiting remote confirmation
//!
//! Every gateway mutation is recorded here before it is forwarded. A
//! successful remote write confirms it immediately. A failed one stays
//! pending with its error: the local change is kept, nothing is rolled back.
//!
//! The push controller reconciles the ledger against each non-empty
//! snapshot. An intent the snapshot already reflects is cleared, which is
//! how a write that failed but later reached the remote some other way
//! stops being reported.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::{Map, Value};
use tracing::debug;

use tokosync_core::domain::{Collection, Record, RecordId};

/// Kind of optimistic write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Create,
    Update,
    Delete,
}

/// One write that has not been confirmed by a remote
#[derive(Debug, Clone, PartialEq)]
pub struct PendingIntent {
    pub kind: WriteKind,
    /// Fields the remote record must carry once the write has landed
    pub expected: Map<String, Value>,
    pub recorded_at: DateTime<Utc>,
    /// Error of the last failed forward, if any
    pub last_error: Option<String>,
}

impl PendingIntent {
    /// Returns true if `remote` (the record with this id in a snapshot, if
    /// any) shows the write has landed
    fn is_reflected_by(&self, remote: Option<&Record>) -> bool {
        match (self.kind, remote) {
            (WriteKind::Delete, found) => found.is_none(),
            (_, None) => false,
            (_, Some(record)) => self
                .expected
                .iter()
                .all(|(field, value)| record.as_map().get(field) == Some(value)),
        }
    }
}

/// Shared pending-write ledger
#[derive(Debug, Clone, Default)]
pub struct PendingWrites {
    entries: Arc<DashMap<(Collection, RecordId), PendingIntent>>,
}

impl PendingWrites {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an intent, replacing any earlier one for the same record
    pub fn record(
        &self,
        collection: Collection,
        id: RecordId,
        kind: WriteKind,
        expected: Map<String, Value>,
        at: DateTime<Utc>,
    ) {
        self.entries.insert(
            (collection, id),
            PendingIntent {
                kind,
                expected,
                recorded_at: at,
                last_error: None,
            },
        );
    }

    /// Clears an intent after the remote accepted it
    pub fn confirm(&self, collection: Collection, id: &RecordId) {
        self.entries.remove(&(collection, id.clone()));
    }

    /// Marks an intent as failed; it stays pending
    pub fn fail(&self, collection: Collection, id: &RecordId, error: impl Into<String>) {
        if let Some(mut intent) = self.entries.get_mut(&(collection, id.clone())) {
            intent.last_error = Some(error.into());
        }
    }

    /// Clears every intent of `collection` that `records` already reflect
    ///
    /// Returns the number of intents cleared.
    pub fn reconcile(&self, collection: Collection, records: &[Record]) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(c, id), intent| {
            if *c != collection {
                return true;
            }
            let remote = records.iter().find(|r| r.id().as_ref() == Some(id));
            !intent.is_reflected_by(remote)
        });
        let cleared = before.saturating_sub(self.entries.len());
        if cleared > 0 {
            debug!(%collection, cleared, "Pending writes reconciled by snapshot");
        }
        cleared
    }

    /// Intent for one record, if pending
    pub fn get(&self, collection: Collection, id: &RecordId) -> Option<PendingIntent> {
        self.entries
            .get(&(collection, id.clone()))
            .map(|e| e.value().clone())
    }

    /// Pending intents of one collection
    pub fn pending_in(&self, collection: Collection) -> Vec<(RecordId, PendingIntent)> {
        self.entries
            .iter()
            .filter(|e| e.key().0 == collection)
            .map(|e| (e.key().1.clone(), e.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
