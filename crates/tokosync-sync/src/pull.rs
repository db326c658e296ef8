//! Pull channel controller
//!
//! The pull remote has no change feed, so it is polled: an initial pass at
//! startup, then one pass per tick of a fixed interval. A pass visits every
//! pullable collection and appends the rows that are not yet known locally.
//! It never updates or deletes existing local records.
//!
//! At most one pass runs at a time. A tick that fires while a pass is still
//! in flight is skipped, not queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use tokosync_core::domain::{Channel, Collection, CollectionDef, Record, RemoteSnapshot};
use tokosync_core::identity::IdentityMatcher;
use tokosync_core::ports::{IPullRemote, QueryFilter};

use crate::context::SyncContext;
use crate::SyncError;

/// Column high-churn tables are ordered by when their query is capped
const CREATED_AT_COLUMN: &str = "created_at";

// ============================================================================
// Pass results
// ============================================================================

/// Result of pulling one collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionPull {
    /// New records were appended
    Appended(usize),
    /// Every row was already known locally
    Unchanged,
    /// The query or the local write failed; logged and skipped
    Failed(String),
    /// The session was torn down before the append
    Discarded,
}

/// Summary of one completed pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Per-collection results, in catalog order
    pub collections: Vec<(Collection, CollectionPull)>,
    /// Rows skipped because they could not be transformed
    pub skipped: usize,
}

impl PassReport {
    /// Total number of records appended
    pub fn appended(&self) -> usize {
        self.collections
            .iter()
            .map(|(_, result)| match result {
                CollectionPull::Appended(n) => *n,
                _ => 0,
            })
            .sum()
    }

    /// Number of collections that failed
    pub fn failures(&self) -> usize {
        self.collections
            .iter()
            .filter(|(_, result)| matches!(result, CollectionPull::Failed(_)))
            .count()
    }

    /// A pass fails as a whole only when every collection failed
    pub fn is_success(&self) -> bool {
        self.collections.is_empty() || self.failures() < self.collections.len()
    }
}

/// What a call to run a pass did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// Another pass was in flight
    Skipped,
    /// A restore is protected
    Suppressed,
    /// The pass ran
    Completed(PassReport),
}

/// Clears the in-flight flag when a pass ends, however it ends
struct InFlight(Arc<AtomicBool>);

impl InFlight {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ============================================================================
// PullSyncController
// ============================================================================

/// Polls the pull remote and appends unknown records locally
#[derive(Clone)]
pub struct PullSyncController {
    ctx: SyncContext,
    remote: Arc<dyn IPullRemote>,
    interval: Duration,
    in_flight: Arc<AtomicBool>,
}

impl PullSyncController {
    /// Creates a controller polling every `interval`
    pub fn new(ctx: SyncContext, remote: Arc<dyn IPullRemote>, interval: Duration) -> Self {
        Self {
            ctx,
            remote,
            interval,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Polling interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns true while a pass is running
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Runs the startup pass and reports it to the status aggregator
    pub async fn initial_pass(&self) -> PassOutcome {
        self.ctx.status.begin_initial(Channel::Pull);
        let outcome = self.run_pass().await;
        let ok = match &outcome {
            PassOutcome::Completed(report) => report.is_success(),
            PassOutcome::Skipped | PassOutcome::Suppressed => true,
        };
        self.ctx.status.finish_initial(Channel::Pull, ok);
        outcome
    }

    /// Runs one pass outside the schedule and records its success
    pub async fn request_pass(&self) -> PassOutcome {
        let outcome = self.run_pass().await;
        if let PassOutcome::Completed(report) = &outcome {
            if report.is_success() && !self.ctx.is_torn_down() {
                self.ctx.status.record_pull_success();
            }
        }
        outcome
    }

    /// Runs one pass over every pullable collection
    ///
    /// Returns [`PassOutcome::Skipped`] if another pass is in flight. A
    /// failing collection is logged and the pass moves on to the next one.
    #[instrument(skip(self))]
    pub async fn run_pass(&self) -> PassOutcome {
        let Some(_in_flight) = InFlight::acquire(&self.in_flight) else {
            debug!("Pull pass already in flight, skipping");
            return PassOutcome::Skipped;
        };

        if self.ctx.guard.is_suppressed().await {
            debug!("Pull pass skipped, restore protected");
            return PassOutcome::Suppressed;
        }

        let mut report = PassReport::default();
        for def in self.ctx.catalog.pull_collections() {
            let result = match self.pull_collection(def, &mut report.skipped).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(collection = %def.collection, error = %e, "Pull failed");
                    CollectionPull::Failed(e.to_string())
                }
            };
            report.collections.push((def.collection, result));
        }

        info!(
            appended = report.appended(),
            failed = report.failures(),
            skipped = report.skipped,
            "Pull pass completed"
        );
        PassOutcome::Completed(report)
    }

    async fn pull_collection(
        &self,
        def: &CollectionDef,
        skipped: &mut usize,
    ) -> Result<CollectionPull, SyncError> {
        let Some(table) = def.pull_table else {
            return Ok(CollectionPull::Unchanged);
        };

        let mut filter = QueryFilter::new().with_limit(def.pull_limit);
        if def.pull_limit.is_some() {
            filter = filter.newest_first(CREATED_AT_COLUMN);
        }

        let rows = self
            .remote
            .query(table, &filter)
            .await
            .map_err(|e| SyncError::Remote(e.context(format!("query on {table} failed"))))?;

        let local = self
            .ctx
            .store
            .read_all(def.collection)
            .await
            .map_err(SyncError::Store)?;
        let matcher = IdentityMatcher::new(def.identity);
        let mut known = matcher.index(&local);
        let snapshot = RemoteSnapshot::from_pull(def.collection, rows);

        let mut fresh: Vec<Record> = Vec::new();
        for entry in &snapshot.entries {
            let record = match self.ctx.transformer.transform(def.collection, entry) {
                Ok(record) => record,
                Err(e) => {
                    *skipped += 1;
                    warn!(collection = %def.collection, error = %e, "Skipping malformed row");
                    continue;
                }
            };
            if !matcher.identifies(&record) {
                *skipped += 1;
                warn!(
                    collection = %def.collection,
                    keys = ?def.identity.fields(),
                    "Skipping row without an identity value"
                );
                continue;
            }
            if known.contains(&record) {
                continue;
            }
            // Also guards against the same row appearing twice in one result
            known.insert(&record);
            fresh.push(record);
        }

        if fresh.is_empty() {
            return Ok(CollectionPull::Unchanged);
        }
        if self.ctx.is_torn_down() {
            return Ok(CollectionPull::Discarded);
        }

        self.ctx
            .store
            .append(def.collection, &fresh)
            .await
            .map_err(SyncError::Store)?;
        debug!(collection = %def.collection, count = fresh.len(), "Appended pulled records");
        Ok(CollectionPull::Appended(fresh.len()))
    }

    /// Arms the periodic ticker
    ///
    /// The first tick fires one interval from now. Each tick spawns a pass;
    /// a pass still in flight makes the next tick a no-op. The ticker stops
    /// when the session is torn down.
    pub fn spawn_ticker(&self) -> JoinHandle<()> {
        let this = self.clone();
        let cancel = self.ctx.cancel.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + this.interval, this.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!(interval_secs = this.interval.as_secs(), "Pull ticker armed");
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let pass = this.clone();
                        tokio::spawn(async move {
                            pass.request_pass().await;
                        });
                    }
                }
            }
            debug!("Pull ticker stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{ManualClock, MemoryCollectionStore, MemoryPullRemote, MemoryRestoreMarker};
    use crate::pending::PendingWrites;
    use crate::restore_guard::{RestoreGuard, DEFAULT_RESTORE_WINDOW};
    use crate::status::SyncStatusAggregator;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;
    use tokosync_core::domain::Catalog;
    use tokosync_core::transform::RecordTransformer;

    struct Fixture {
        store: Arc<MemoryCollectionStore>,
        remote: MemoryPullRemote,
        ctx: SyncContext,
        controller: PullSyncController,
    }

    fn fixture(catalog: Catalog) -> Fixture {
        let store = Arc::new(MemoryCollectionStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 10, 19, 10, 0, 0).unwrap(),
        ));
        let remote = MemoryPullRemote::new();
        let ctx = SyncContext {
            store: store.clone(),
            guard: Arc::new(RestoreGuard::new(
                Arc::new(MemoryRestoreMarker::new()),
                clock.clone(),
                DEFAULT_RESTORE_WINDOW,
            )),
            status: Arc::new(SyncStatusAggregator::new(false, true, clock.clone())),
            pending: PendingWrites::new(),
            catalog: Arc::new(catalog),
            clock,
            transformer: RecordTransformer::new(),
            cancel: CancellationToken::new(),
        };
        let controller =
            PullSyncController::new(ctx.clone(), Arc::new(remote.clone()), Duration::from_secs(60));
        Fixture {
            store,
            remote,
            ctx,
            controller,
        }
    }

    fn products_only() -> Catalog {
        Catalog::standard().with_pull_set(&[Collection::Products])
    }

    fn rec(collection: Collection, value: serde_json::Value) -> Record {
        Record::from_value(collection, value).unwrap()
    }

    #[tokio::test]
    async fn test_pass_appends_only_unknown_rows() {
        let f = fixture(products_only());
        f.store.seed(
            Collection::Products,
            vec![rec(Collection::Products, json!({"id": "1", "sku": "S1", "name": "Kopi"}))],
        );
        f.remote.set_table(
            "products",
            vec![
                json!({"id": 1, "sku": "S1", "name": "Kopi baru"}),
                json!({"id": 2, "sku": "S2", "name": "Teh"}),
            ],
        );

        let outcome = f.controller.run_pass().await;

        let PassOutcome::Completed(report) = outcome else {
            panic!("expected a completed pass");
        };
        assert_eq!(report.appended(), 1);
        let local = f.store.snapshot(Collection::Products);
        assert_eq!(local.len(), 2);
        assert_eq!(local[0].get_str("name"), Some("Kopi"));
        assert_eq!(local[1].get_str("id"), Some("2"));
    }

    #[tokio::test]
    async fn test_secondary_key_prevents_duplicate() {
        let f = fixture(products_only());
        f.store.seed(
            Collection::Products,
            vec![rec(Collection::Products, json!({"id": "local-1", "sku": "S1"}))],
        );
        f.remote
            .set_table("products", vec![json!({"id": 99, "sku": "S1"})]);

        f.controller.run_pass().await;

        assert_eq!(f.store.snapshot(Collection::Products).len(), 1);
    }

    #[tokio::test]
    async fn test_same_row_twice_in_one_result_appended_once() {
        let f = fixture(products_only());
        f.remote.set_table(
            "products",
            vec![json!({"id": 5, "name": "Gula"}), json!({"id": 5, "name": "Gula"})],
        );

        f.controller.run_pass().await;

        assert_eq!(f.store.snapshot(Collection::Products).len(), 1);
    }

    #[tokio::test]
    async fn test_row_without_identity_is_skipped_every_pass() {
        let f = fixture(Catalog::standard().with_pull_set(&[Collection::Customers]));
        f.remote.set_table(
            "customers",
            vec![json!({"name": "Walk-in"}), json!({"id": "c1", "name": "Budi"})],
        );

        for _ in 0..3 {
            let PassOutcome::Completed(report) = f.controller.run_pass().await else {
                panic!("expected a completed pass");
            };
            assert_eq!(report.skipped, 1);
        }

        let local = f.store.snapshot(Collection::Customers);
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].get_str("id"), Some("c1"));
    }

    #[tokio::test]
    async fn test_pass_is_idempotent() {
        let f = fixture(products_only());
        f.remote
            .set_table("products", vec![json!({"id": 1, "name": "Kopi"})]);

        f.controller.run_pass().await;
        let writes = f.store.write_count();
        f.controller.run_pass().await;

        assert_eq!(f.store.snapshot(Collection::Products).len(), 1);
        assert_eq!(f.store.write_count(), writes);
    }

    #[tokio::test]
    async fn test_high_churn_query_is_capped_newest_first() {
        let f = fixture(Catalog::standard().with_pull_set(&[Collection::Transactions]));

        f.controller.run_pass().await;

        let queries = f.remote.queries();
        assert_eq!(queries.len(), 1);
        let (table, filter) = &queries[0];
        assert_eq!(table, "transactions");
        assert_eq!(filter.limit, Some(500));
        assert_eq!(filter.order_by.as_deref(), Some("created_at"));
        assert!(filter.descending);
    }

    #[tokio::test]
    async fn test_failing_collection_does_not_stop_pass() {
        let f = fixture(
            Catalog::standard().with_pull_set(&[Collection::Products, Collection::Customers]),
        );
        f.remote.fail_table("products");
        f.remote
            .set_table("customers", vec![json!({"id": "c1", "name": "Budi"})]);

        let PassOutcome::Completed(report) = f.controller.run_pass().await else {
            panic!("expected a completed pass");
        };

        assert_eq!(report.failures(), 1);
        assert!(report.is_success());
        assert_eq!(f.store.snapshot(Collection::Customers).len(), 1);
    }

    #[tokio::test]
    async fn test_initial_pass_fails_when_every_collection_fails() {
        let f = fixture(products_only());
        f.remote.fail_table("products");

        f.controller.initial_pass().await;

        let status = f.ctx.status.status();
        assert!(!status.connected);
        assert!(!status.syncing);
    }

    #[tokio::test]
    async fn test_suppressed_pass_reads_nothing() {
        let f = fixture(products_only());
        f.ctx.guard.mark_restored().await.unwrap();

        assert_eq!(f.controller.run_pass().await, PassOutcome::Suppressed);
        assert!(f.remote.queries().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_pass_is_skipped() {
        let f = fixture(products_only());
        f.remote.set_query_delay(Some(Duration::from_secs(90)));

        let slow = {
            let controller = f.controller.clone();
            tokio::spawn(async move { controller.run_pass().await })
        };
        tokio::task::yield_now().await;
        assert!(f.controller.is_in_flight());

        assert_eq!(f.controller.run_pass().await, PassOutcome::Skipped);

        assert!(matches!(slow.await.unwrap(), PassOutcome::Completed(_)));
        assert!(!f.controller.is_in_flight());
        assert_eq!(f.remote.queries().len(), 1);
    }

    #[tokio::test]
    async fn test_torn_down_pass_discards_append() {
        let f = fixture(products_only());
        f.remote
            .set_table("products", vec![json!({"id": 1, "name": "Kopi"})]);
        f.ctx.cancel.cancel();

        let PassOutcome::Completed(report) = f.controller.run_pass().await else {
            panic!("expected a completed pass");
        };

        assert_eq!(
            report.collections,
            vec![(Collection::Products, CollectionPull::Discarded)]
        );
        assert_eq!(f.store.write_count(), 0);
    }
}
