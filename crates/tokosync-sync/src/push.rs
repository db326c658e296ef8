//! Push channel controller
//!
//! One long-lived subscription per collection. Every snapshot a subscription
//! delivers is merged into the local store according to the collection's
//! [`MergePolicy`]:
//!
//! 1. **Guard**: while a restore is protected the snapshot is ignored.
//! 2. **Empty snapshot**: preserved, cleared, or seeded with the collection's
//!    bootstrap record.
//! 3. **Non-empty snapshot**: deduplicated (where configured), transformed,
//!    and written as the authoritative content of the collection.
//!
//! Categories are special: the local list is the union of the remote list and
//! the category names used by local products, and the union is written back
//! when it grew.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use tokosync_core::domain::{
    Collection, CollectionDef, CollectionKind, MergePolicy, Record, RemoteSnapshot,
};
use tokosync_core::ports::{IPushRemote, SubscriptionHandle};

use crate::context::SyncContext;
use crate::dedup::{normalize_dedup_key, spawn_duplicate_deletes, DeduplicationPass};
use crate::SyncError;

// ============================================================================
// MergeOutcome
// ============================================================================

/// What one snapshot did to local state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A restore is protected; nothing was read or written
    Suppressed,
    /// Empty snapshot on a preserve collection; local state untouched
    Preserved,
    /// Empty snapshot on a clear collection; local state emptied
    Cleared,
    /// Empty snapshot on a collection with a bootstrap record
    Seeded {
        /// The bootstrap record also reached the push remote
        uploaded: bool,
    },
    /// Local state replaced by the snapshot
    Replaced {
        /// Records written
        count: usize,
        /// Entries dropped because they could not be transformed
        skipped: usize,
        /// Entries dropped as duplicates
        duplicates: usize,
    },
    /// Every entry of a non-empty snapshot was malformed; local state untouched
    Rejected {
        skipped: usize,
    },
    /// Categories replaced by the union of remote and product categories
    CategoriesMerged {
        count: usize,
        /// The union was written back to the push remote
        uploaded: bool,
    },
    /// The session was torn down before the merge could be written
    Discarded,
}

/// Result of opening every subscription
#[derive(Debug, Default)]
pub struct PushStartup {
    /// Live subscription handles, released on teardown
    pub handles: Vec<SubscriptionHandle>,
    /// One listener task per live subscription
    pub tasks: Vec<JoinHandle<()>>,
    /// Collections whose subscription could not be opened
    pub failed: Vec<Collection>,
}

impl PushStartup {
    /// Returns true if at least one subscription is live, or none were needed
    pub fn is_established(&self) -> bool {
        !self.handles.is_empty() || self.failed.is_empty()
    }
}

// ============================================================================
// PushSyncController
// ============================================================================

/// Merges push-remote snapshots into the local store
#[derive(Clone)]
pub struct PushSyncController {
    ctx: SyncContext,
    remote: Arc<dyn IPushRemote>,
    dedup_delete_limit: usize,
}

impl PushSyncController {
    /// Creates a controller over the given remote
    pub fn new(ctx: SyncContext, remote: Arc<dyn IPushRemote>, dedup_delete_limit: usize) -> Self {
        Self {
            ctx,
            remote,
            dedup_delete_limit,
        }
    }

    /// Opens one subscription per catalog collection
    ///
    /// A collection whose subscription fails is logged and skipped; the
    /// others proceed.
    pub async fn open_subscriptions(&self) -> PushStartup {
        let mut startup = PushStartup::default();

        for def in self.ctx.catalog.iter() {
            match self.remote.subscribe(def.push_path).await {
                Ok(subscription) => {
                    debug!(collection = %def.collection, path = def.push_path, "Subscribed");
                    startup
                        .tasks
                        .push(self.spawn_listener(def.collection, subscription.snapshots));
                    startup.handles.push(subscription.handle);
                }
                Err(e) => {
                    warn!(
                        collection = %def.collection,
                        path = def.push_path,
                        error = %e,
                        "Failed to subscribe to push remote"
                    );
                    startup.failed.push(def.collection);
                }
            }
        }

        info!(
            live = startup.handles.len(),
            failed = startup.failed.len(),
            "Push subscriptions opened"
        );
        startup
    }

    /// Spawns the task that merges every snapshot of one subscription
    ///
    /// The task ends when the session is torn down or the subscription
    /// closes. A merge that is already running when teardown fires is
    /// allowed to finish; it discards its result instead of writing.
    fn spawn_listener(
        &self,
        collection: Collection,
        mut snapshots: mpsc::Receiver<Option<Value>>,
    ) -> JoinHandle<()> {
        let this = self.clone();
        let cancel = self.ctx.cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    snapshot = snapshots.recv() => {
                        let Some(raw) = snapshot else {
                            debug!(%collection, "Subscription closed");
                            break;
                        };
                        match this.handle_snapshot(collection, raw).await {
                            Ok(outcome) => debug!(%collection, ?outcome, "Snapshot merged"),
                            Err(e) => warn!(%collection, error = %e, "Failed to merge snapshot"),
                        }
                    }
                }
            }
        })
    }

    /// Merges one raw snapshot into the local store
    ///
    /// # Errors
    /// - [`SyncError::UnknownCollection`] if the collection is not in the catalog
    /// - [`SyncError::Store`] if the local store fails
    #[instrument(skip(self, collection, raw), fields(collection = %collection))]
    pub async fn handle_snapshot(
        &self,
        collection: Collection,
        raw: Option<Value>,
    ) -> Result<MergeOutcome, SyncError> {
        if self.ctx.guard.is_suppressed().await {
            debug!(%collection, "Snapshot ignored, restore protected");
            return Ok(MergeOutcome::Suppressed);
        }

        let def = self.ctx.def(collection)?;
        let snapshot = RemoteSnapshot::from_push(collection, raw);

        if def.kind == CollectionKind::DerivedCategories {
            return self.merge_categories(def, snapshot).await;
        }

        if snapshot.is_empty() {
            return self.merge_empty(def).await;
        }

        self.merge_authoritative(def, snapshot).await
    }

    async fn merge_empty(&self, def: &CollectionDef) -> Result<MergeOutcome, SyncError> {
        match (def.policy, def.bootstrap) {
            (MergePolicy::PreserveOnEmpty, _) => {
                debug!(collection = %def.collection, "Empty snapshot, keeping local data");
                Ok(MergeOutcome::Preserved)
            }
            (MergePolicy::ClearOnEmpty, Some(bootstrap)) => {
                let seed = bootstrap();
                let uploaded = self.upload_bootstrap(def, &seed).await;
                if self.ctx.is_torn_down() {
                    return Ok(MergeOutcome::Discarded);
                }
                self.replace(def.collection, std::slice::from_ref(&seed))
                    .await?;
                info!(collection = %def.collection, uploaded, "Seeded bootstrap record");
                Ok(MergeOutcome::Seeded { uploaded })
            }
            (MergePolicy::ClearOnEmpty, None) => {
                if self.ctx.is_torn_down() {
                    return Ok(MergeOutcome::Discarded);
                }
                self.replace(def.collection, &[]).await?;
                debug!(collection = %def.collection, "Empty snapshot, local data cleared");
                Ok(MergeOutcome::Cleared)
            }
        }
    }

    async fn upload_bootstrap(&self, def: &CollectionDef, seed: &Record) -> bool {
        let Some(id) = seed.id() else {
            warn!(collection = %def.collection, "Bootstrap record has no id, not uploaded");
            return false;
        };
        let path = def.record_path(&id);
        match self.remote.write_full(&path, &seed.to_value()).await {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %path, error = %e, "Failed to upload bootstrap record");
                false
            }
        }
    }

    async fn merge_authoritative(
        &self,
        def: &CollectionDef,
        snapshot: RemoteSnapshot,
    ) -> Result<MergeOutcome, SyncError> {
        let mut entries = snapshot.entries;
        let mut duplicates = 0;

        if let Some(field) = def.dedup_key {
            let outcome = DeduplicationPass::new(def.collection, field).run(entries);
            duplicates = outcome.dropped;
            spawn_duplicate_deletes(
                Arc::clone(&self.remote),
                def.push_path,
                outcome.duplicate_ids,
                self.dedup_delete_limit,
                self.ctx.cancel.child_token(),
            );
            entries = outcome.kept;
        }

        let mut records = Vec::with_capacity(entries.len());
        let mut skipped = 0;
        for entry in &entries {
            match self.ctx.transformer.transform(def.collection, entry) {
                Ok(record) => records.push(record),
                Err(e) => {
                    skipped += 1;
                    warn!(
                        collection = %def.collection,
                        key = ?entry.key,
                        error = %e,
                        "Skipping malformed record"
                    );
                }
            }
        }

        if records.is_empty() {
            warn!(
                collection = %def.collection,
                skipped,
                "Every record in the snapshot was malformed, keeping local data"
            );
            return Ok(MergeOutcome::Rejected { skipped });
        }

        if self.ctx.is_torn_down() {
            return Ok(MergeOutcome::Discarded);
        }

        self.replace(def.collection, &records).await?;
        self.ctx.pending.reconcile(def.collection, &records);

        Ok(MergeOutcome::Replaced {
            count: records.len(),
            skipped,
            duplicates,
        })
    }

    async fn merge_categories(
        &self,
        def: &CollectionDef,
        snapshot: RemoteSnapshot,
    ) -> Result<MergeOutcome, SyncError> {
        let remote_records: Vec<Record> = snapshot
            .entries
            .iter()
            .filter_map(|entry| {
                self.ctx
                    .transformer
                    .transform(def.collection, entry)
                    .map_err(|e| {
                        warn!(key = ?entry.key, error = %e, "Skipping malformed category")
                    })
                    .ok()
            })
            .collect();

        let product_names = self.product_category_names().await?;

        let union = if snapshot.is_empty() {
            // Nothing remote: rebuild from what this device already knows
            let local = self
                .ctx
                .store
                .read_all(def.collection)
                .await
                .map_err(SyncError::Store)?;
            self.category_union(local, &product_names)
        } else {
            self.category_union(remote_records.clone(), &product_names)
        };

        if union.is_empty() {
            return Ok(MergeOutcome::Preserved);
        }

        let uploaded = if snapshot.is_empty() || union.len() > remote_records.len() {
            self.upload_categories(def, &union).await
        } else {
            false
        };

        if self.ctx.is_torn_down() {
            return Ok(MergeOutcome::Discarded);
        }

        self.replace(def.collection, &union).await?;
        Ok(MergeOutcome::CategoriesMerged {
            count: union.len(),
            uploaded,
        })
    }

    /// Distinct category names used by local products, in product order
    async fn product_category_names(&self) -> Result<Vec<String>, SyncError> {
        let products = self
            .ctx
            .store
            .read_all(Collection::Products)
            .await
            .map_err(SyncError::Store)?;

        let mut seen = HashSet::new();
        Ok(products
            .iter()
            .filter_map(|p| p.get_str("category"))
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .filter(|name| seen.insert(name.to_lowercase()))
            .map(str::to_string)
            .collect())
    }

    /// `base` followed by every name in `names` that `base` does not carry yet
    fn category_union(&self, base: Vec<Record>, names: &[String]) -> Vec<Record> {
        let mut known: HashSet<String> = base
            .iter()
            .filter_map(|c| c.get("name").and_then(normalize_dedup_key))
            .collect();

        let mut union = base;
        for name in names {
            if known.insert(name.to_lowercase()) {
                union.push(self.ctx.transformer.category_from_name(name));
            }
        }
        union
    }

    async fn upload_categories(&self, def: &CollectionDef, categories: &[Record]) -> bool {
        let mut body = Map::new();
        for category in categories {
            if let Some(id) = category.id() {
                body.insert(id.to_string(), category.to_value());
            }
        }

        match self.remote.write_full(def.push_path, &Value::Object(body)).await {
            Ok(()) => {
                info!(count = categories.len(), "Uploaded merged categories");
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to upload merged categories");
                false
            }
        }
    }

    async fn replace(&self, collection: Collection, records: &[Record]) -> Result<(), SyncError> {
        self.ctx
            .store
            .replace_all(collection, records)
            .await
            .map_err(SyncError::Store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{ManualClock, MemoryCollectionStore, MemoryPushRemote, MemoryRestoreMarker};
    use crate::pending::{PendingWrites, WriteKind};
    use crate::restore_guard::{RestoreGuard, DEFAULT_RESTORE_WINDOW};
    use crate::status::SyncStatusAggregator;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;
    use tokosync_core::domain::{Catalog, RecordId};
    use tokosync_core::transform::RecordTransformer;

    struct Fixture {
        store: Arc<MemoryCollectionStore>,
        marker: Arc<MemoryRestoreMarker>,
        remote: MemoryPushRemote,
        ctx: SyncContext,
        controller: PushSyncController,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryCollectionStore::new());
        let marker = Arc::new(MemoryRestoreMarker::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 10, 19, 10, 0, 0).unwrap(),
        ));
        let remote = MemoryPushRemote::new();
        let ctx = SyncContext {
            store: store.clone(),
            guard: Arc::new(RestoreGuard::new(
                marker.clone(),
                clock.clone(),
                DEFAULT_RESTORE_WINDOW,
            )),
            status: Arc::new(SyncStatusAggregator::new(true, false, clock.clone())),
            pending: PendingWrites::new(),
            catalog: Arc::new(Catalog::standard()),
            clock,
            transformer: RecordTransformer::new(),
            cancel: CancellationToken::new(),
        };
        let controller = PushSyncController::new(ctx.clone(), Arc::new(remote.clone()), 100);
        Fixture {
            store,
            marker,
            remote,
            ctx,
            controller,
        }
    }

    fn rec(collection: Collection, value: Value) -> Record {
        Record::from_value(collection, value).unwrap()
    }

    #[tokio::test]
    async fn test_empty_snapshot_preserves_products() {
        let f = fixture();
        let kept = vec![rec(Collection::Products, json!({"id": "p1", "name": "Kopi"}))];
        f.store.seed(Collection::Products, kept.clone());

        let outcome = f
            .controller
            .handle_snapshot(Collection::Products, None)
            .await
            .unwrap();

        assert_eq!(outcome, MergeOutcome::Preserved);
        assert_eq!(f.store.snapshot(Collection::Products), kept);
        assert_eq!(f.store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_snapshot_clears_customers() {
        let f = fixture();
        f.store.seed(
            Collection::Customers,
            vec![rec(Collection::Customers, json!({"id": "c1"}))],
        );

        let outcome = f
            .controller
            .handle_snapshot(Collection::Customers, Some(json!({})))
            .await
            .unwrap();

        assert_eq!(outcome, MergeOutcome::Cleared);
        assert!(f.store.snapshot(Collection::Customers).is_empty());
    }

    #[tokio::test]
    async fn test_empty_accounts_seed_default_cash_account() {
        let f = fixture();

        let outcome = f
            .controller
            .handle_snapshot(Collection::Accounts, None)
            .await
            .unwrap();

        assert_eq!(outcome, MergeOutcome::Seeded { uploaded: true });
        let local = f.store.snapshot(Collection::Accounts);
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].get_str("id"), Some("cash"));
        assert_eq!(local[0].get("isDefault"), Some(&json!(true)));
        assert_eq!(
            f.remote.value("accounts/cash").and_then(|v| v.get("name").cloned()),
            Some(json!("Cash"))
        );
    }

    #[tokio::test]
    async fn test_seed_kept_locally_when_upload_fails() {
        let f = fixture();
        f.remote.set_fail_writes(true);

        let outcome = f
            .controller
            .handle_snapshot(Collection::Settings, None)
            .await
            .unwrap();

        assert_eq!(outcome, MergeOutcome::Seeded { uploaded: false });
        assert_eq!(f.store.snapshot(Collection::Settings).len(), 1);
    }

    #[tokio::test]
    async fn test_non_empty_snapshot_replaces_in_order() {
        let f = fixture();
        f.store.seed(
            Collection::Expenses,
            vec![rec(Collection::Expenses, json!({"id": "old"}))],
        );

        let outcome = f
            .controller
            .handle_snapshot(
                Collection::Expenses,
                Some(json!({
                    "e2": {"description": "Listrik", "amount": "150000"},
                    "e1": {"description": "Air", "amount": 20000}
                })),
            )
            .await
            .unwrap();

        assert!(matches!(outcome, MergeOutcome::Replaced { count: 2, .. }));
        let ids: Vec<_> = f
            .store
            .snapshot(Collection::Expenses)
            .iter()
            .filter_map(Record::id)
            .map(|id| id.to_string())
            .collect();
        assert_eq!(ids, vec!["e2", "e1"]);
    }

    #[tokio::test]
    async fn test_malformed_entries_are_skipped() {
        let f = fixture();

        let outcome = f
            .controller
            .handle_snapshot(
                Collection::Suppliers,
                Some(json!({"s1": {"name": "PT A"}, "s2": "garbage", "s3": {"phone": "1"}})),
            )
            .await
            .unwrap();

        assert_eq!(
            outcome,
            MergeOutcome::Replaced {
                count: 1,
                skipped: 2,
                duplicates: 0
            }
        );
    }

    #[tokio::test]
    async fn test_all_malformed_snapshot_keeps_local_data() {
        let f = fixture();
        let kept = vec![rec(Collection::Suppliers, json!({"id": "s1", "name": "PT A"}))];
        f.store.seed(Collection::Suppliers, kept.clone());

        let outcome = f
            .controller
            .handle_snapshot(Collection::Suppliers, Some(json!(["x", 3])))
            .await
            .unwrap();

        assert_eq!(outcome, MergeOutcome::Rejected { skipped: 2 });
        assert_eq!(f.store.snapshot(Collection::Suppliers), kept);
    }

    #[tokio::test]
    async fn test_supplier_duplicates_collapsed_and_deleted() {
        let f = fixture();

        let outcome = f
            .controller
            .handle_snapshot(
                Collection::Suppliers,
                Some(json!({
                    "1": {"id": 1, "name": "PT Sukses"},
                    "2": {"id": 2, "name": "pt sukses "}
                })),
            )
            .await
            .unwrap();

        assert_eq!(
            outcome,
            MergeOutcome::Replaced {
                count: 1,
                skipped: 0,
                duplicates: 1
            }
        );
        let local = f.store.snapshot(Collection::Suppliers);
        assert_eq!(local[0].get_str("id"), Some("1"));

        // The delete runs in the background
        for _ in 0..50 {
            if !f.remote.deleted_paths().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(f.remote.deleted_paths(), vec!["suppliers/2"]);
    }

    #[tokio::test]
    async fn test_supplier_duplicates_collapsed_across_name_aliases() {
        let f = fixture();

        let outcome = f
            .controller
            .handle_snapshot(
                Collection::Suppliers,
                Some(json!({
                    "1": {"name": "PT Sukses"},
                    "2": {"supplierName": "pt sukses "}
                })),
            )
            .await
            .unwrap();

        assert_eq!(
            outcome,
            MergeOutcome::Replaced {
                count: 1,
                skipped: 0,
                duplicates: 1
            }
        );
        let local = f.store.snapshot(Collection::Suppliers);
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].get_str("name"), Some("PT Sukses"));

        for _ in 0..50 {
            if !f.remote.deleted_paths().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(f.remote.deleted_paths(), vec!["suppliers/2"]);
    }

    #[tokio::test]
    async fn test_suppressed_snapshot_touches_nothing() {
        let f = fixture();
        f.ctx.guard.mark_restored().await.unwrap();
        assert!(f.marker.stored().is_some());

        let outcome = f
            .controller
            .handle_snapshot(Collection::Customers, None)
            .await
            .unwrap();

        assert_eq!(outcome, MergeOutcome::Suppressed);
        assert_eq!(f.store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_torn_down_merge_is_discarded() {
        let f = fixture();
        f.ctx.cancel.cancel();

        let outcome = f
            .controller
            .handle_snapshot(Collection::Debts, Some(json!({"d1": {"amount": 1}})))
            .await
            .unwrap();

        assert_eq!(outcome, MergeOutcome::Discarded);
        assert_eq!(f.store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_categories_union_written_back() {
        let f = fixture();
        f.store.seed(
            Collection::Products,
            vec![
                rec(Collection::Products, json!({"id": "p1", "category": "Minuman"})),
                rec(Collection::Products, json!({"id": "p2", "category": "Snack"})),
            ],
        );

        let outcome = f
            .controller
            .handle_snapshot(
                Collection::Categories,
                Some(json!({"minuman": {"id": "minuman", "name": "minuman"}})),
            )
            .await
            .unwrap();

        assert_eq!(
            outcome,
            MergeOutcome::CategoriesMerged {
                count: 2,
                uploaded: true
            }
        );
        let names: Vec<_> = f
            .store
            .snapshot(Collection::Categories)
            .iter()
            .filter_map(|c| c.get_str("name").map(str::to_string))
            .collect();
        assert_eq!(names, vec!["minuman", "Snack"]);
        assert!(f.remote.value("categories/Snack").is_some());
    }

    #[tokio::test]
    async fn test_categories_not_uploaded_when_remote_covers_products() {
        let f = fixture();
        f.store.seed(
            Collection::Products,
            vec![rec(Collection::Products, json!({"id": "p1", "category": "Snack"}))],
        );

        let outcome = f
            .controller
            .handle_snapshot(Collection::Categories, Some(json!(["Snack", "Rokok"])))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            MergeOutcome::CategoriesMerged {
                count: 2,
                uploaded: false
            }
        );
        assert!(f.remote.writes().is_empty());
    }

    #[tokio::test]
    async fn test_empty_remote_categories_rebuilt_from_local() {
        let f = fixture();
        f.store.seed(
            Collection::Categories,
            vec![rec(Collection::Categories, json!({"id": "Sembako", "name": "Sembako"}))],
        );
        f.store.seed(
            Collection::Products,
            vec![rec(Collection::Products, json!({"id": "p1", "category": "Snack"}))],
        );

        let outcome = f
            .controller
            .handle_snapshot(Collection::Categories, None)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            MergeOutcome::CategoriesMerged {
                count: 2,
                uploaded: true
            }
        );
        assert_eq!(
            f.remote.value("categories").map(|v| v.as_object().map(Map::len)),
            Some(Some(2))
        );
    }

    #[tokio::test]
    async fn test_snapshot_reconciles_pending_writes() {
        let f = fixture();
        let id = RecordId::new("d1").unwrap();
        let expected = json!({"amount": 5}).as_object().cloned().unwrap();
        f.ctx
            .pending
            .record(Collection::Debts, id.clone(), WriteKind::Update, expected, Utc::now());

        f.controller
            .handle_snapshot(Collection::Debts, Some(json!({"d1": {"amount": 5}})))
            .await
            .unwrap();

        assert!(f.ctx.pending.get(Collection::Debts, &id).is_none());
    }

    #[tokio::test]
    async fn test_failed_subscription_does_not_block_others() {
        let f = fixture();
        f.remote.fail_subscribe("products");

        let startup = f.controller.open_subscriptions().await;

        assert_eq!(startup.failed, vec![Collection::Products]);
        assert_eq!(startup.handles.len(), Collection::ALL.len() - 1);
        assert!(startup.is_established());

        f.ctx.cancel.cancel();
        for handle in startup.handles {
            handle.release();
        }
        for task in startup.tasks {
            task.await.unwrap();
        }
        assert_eq!(f.remote.live_count(), 0);
    }
}
