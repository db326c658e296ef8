//! Duplicate collapsing for push snapshots
//!
//! Some collections accumulate duplicates on the push remote (the same
//! supplier entered twice from two devices). Before such a snapshot is
//! merged, records sharing a normalized key are collapsed: the first one in
//! snapshot order survives, the others are dropped from the merge and
//! deleted from the remote in the background.
//!
//! The deletes are best effort. They are bounded per snapshot, failures are
//! logged and not retried, and the merge never waits for them.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tokosync_core::domain::{Collection, RemoteEntry};
use tokosync_core::ports::IPushRemote;
use tokosync_core::transform::resolve_field;

/// Normalizes a dedup key: trimmed, lower-cased
///
/// Returns `None` for values that cannot be compared (absent, blank,
/// non-scalar), which are never treated as duplicates.
pub fn normalize_dedup_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let key = s.trim().to_lowercase();
            (!key.is_empty()).then_some(key)
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Result of one deduplication run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DedupOutcome {
    /// Surviving entries, in snapshot order
    pub kept: Vec<RemoteEntry>,
    /// Remote ids of dropped duplicates
    pub duplicate_ids: Vec<String>,
    /// Number of dropped duplicates, including those without a remote id
    pub dropped: usize,
}

/// Collapses entries sharing a normalized key
///
/// The key is read through the collection's field aliases, so a raw
/// `supplierName` and a raw `name` compare as the same field.
#[derive(Debug, Clone, Copy)]
pub struct DeduplicationPass {
    collection: Collection,
    field: &'static str,
}

impl DeduplicationPass {
    /// Creates a pass keyed on `field` of `collection`
    pub fn new(collection: Collection, field: &'static str) -> Self {
        Self { collection, field }
    }

    /// Field the pass compares
    pub fn field(&self) -> &'static str {
        self.field
    }

    /// Runs the pass; first occurrence in snapshot order wins
    pub fn run(&self, entries: Vec<RemoteEntry>) -> DedupOutcome {
        let mut seen = HashSet::new();
        let mut outcome = DedupOutcome::default();

        for entry in entries {
            let key = resolve_field(self.collection, self.field, &entry.value)
                .as_ref()
                .and_then(normalize_dedup_key);
            match key {
                Some(key) if !seen.insert(key.clone()) => {
                    debug!(field = self.field, key = %key, "Dropping duplicate record");
                    outcome.dropped += 1;
                    if let Some(id) = entry.remote_id() {
                        outcome.duplicate_ids.push(id);
                    }
                }
                _ => outcome.kept.push(entry),
            }
        }

        outcome
    }
}

/// Deletes duplicates from the push remote in the background
///
/// At most `limit` deletes are issued; the rest are left for a later
/// snapshot. The task stops early when `cancel` fires. Returns `None` when
/// there is nothing to delete.
pub fn spawn_duplicate_deletes(
    remote: Arc<dyn IPushRemote>,
    push_path: &'static str,
    ids: Vec<String>,
    limit: usize,
    cancel: CancellationToken,
) -> Option<JoinHandle<()>> {
    if ids.is_empty() {
        return None;
    }

    if ids.len() > limit {
        info!(
            path = push_path,
            total = ids.len(),
            limit,
            "Duplicate delete limit reached, deferring the rest"
        );
    }

    Some(tokio::spawn(async move {
        for id in ids.into_iter().take(limit) {
            if cancel.is_cancelled() {
                debug!(path = push_path, "Session torn down, stopping duplicate deletes");
                break;
            }
            let path = format!("{push_path}/{id}");
            match remote.delete(&path).await {
                Ok(()) => debug!(path = %path, "Deleted duplicate record"),
                Err(e) => warn!(path = %path, error = %e, "Failed to delete duplicate record"),
            }
        }
    }))
}
