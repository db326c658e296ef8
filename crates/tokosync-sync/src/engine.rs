//! Sync session lifecycle
//!
//! [`SyncEngine`] wires the ports into controllers and starts a
//! [`SyncSession`]:
//!
//! 1. **Guard check**: if a restore is still protected, both channels skip
//!    their initial sync and report connected/idle.
//! 2. **Push**: one subscription per collection, each with its own listener.
//! 3. **Pull**: an initial pass, then a ticker.
//!
//! [`SyncSession::teardown`] cancels the session token, releases every
//! subscription handle exactly once and waits for the listener tasks. Work
//! that is already running finishes but discards its result.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tokosync_core::config::Config;
use tokosync_core::domain::{Catalog, Channel, Collection, SessionId};
use tokosync_core::ports::{ICollectionStore, IPullRemote, IPushRemote, IRestoreMarkerStore};
use tokosync_core::ports::SubscriptionHandle;
use tokosync_core::transform::RecordTransformer;

use crate::context::SyncContext;
use crate::gateway::WriteThroughGateway;
use crate::pending::PendingWrites;
use crate::pull::{PassOutcome, PullSyncController};
use crate::push::PushSyncController;
use crate::restore_guard::{Clock, RestoreGuard, SystemClock, DEFAULT_RESTORE_WINDOW};
use crate::status::{SyncStatus, SyncStatusAggregator};
use crate::SyncError;

/// Default interval between pull passes
pub const DEFAULT_PULL_INTERVAL: Duration = Duration::from_secs(60);

/// Default cap on duplicate deletes per snapshot
pub const DEFAULT_DEDUP_DELETE_LIMIT: usize = 100;

// ============================================================================
// EngineSettings
// ============================================================================

/// Tunables of one engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub pull_interval: Duration,
    pub restore_window: Duration,
    pub dedup_delete_limit: usize,
    /// Collections the pull channel polls; `None` for every pullable one
    pub pull_set: Option<Vec<Collection>>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            pull_interval: DEFAULT_PULL_INTERVAL,
            restore_window: DEFAULT_RESTORE_WINDOW,
            dedup_delete_limit: DEFAULT_DEDUP_DELETE_LIMIT,
            pull_set: None,
        }
    }
}

impl EngineSettings {
    /// Reads the settings from the `sync` section of a config
    ///
    /// # Errors
    /// Returns [`SyncError::DomainError`] if `pull_collections` names an
    /// unknown collection.
    pub fn from_config(config: &Config) -> Result<Self, SyncError> {
        Ok(Self {
            pull_interval: config.pull_interval(),
            restore_window: config.restore_window(),
            dedup_delete_limit: config.sync.dedup_delete_limit,
            pull_set: config.pull_collection_set()?,
        })
    }
}

// ============================================================================
// SyncEngine
// ============================================================================

/// Builds sync sessions from injected ports
pub struct SyncEngine {
    store: Arc<dyn ICollectionStore>,
    marker: Arc<dyn IRestoreMarkerStore>,
    push: Option<Arc<dyn IPushRemote>>,
    pull: Option<Arc<dyn IPullRemote>>,
    clock: Arc<dyn Clock>,
    catalog: Catalog,
    settings: EngineSettings,
}

impl SyncEngine {
    /// Creates an engine with no remotes, the standard catalog and default settings
    pub fn new(store: Arc<dyn ICollectionStore>, marker: Arc<dyn IRestoreMarkerStore>) -> Self {
        Self {
            store,
            marker,
            push: None,
            pull: None,
            clock: Arc::new(SystemClock),
            catalog: Catalog::standard(),
            settings: EngineSettings::default(),
        }
    }

    pub fn with_push_remote(mut self, remote: Arc<dyn IPushRemote>) -> Self {
        self.push = Some(remote);
        self
    }

    pub fn with_pull_remote(mut self, remote: Arc<dyn IPullRemote>) -> Self {
        self.pull = Some(remote);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Starts a session
    ///
    /// A failing subscription or pull collection is logged and does not fail
    /// the start.
    ///
    /// # Errors
    /// Returns [`SyncError::Startup`] if the pull interval is zero.
    pub async fn start(&self) -> Result<SyncSession, SyncError> {
        if self.pull.is_some() && self.settings.pull_interval.is_zero() {
            return Err(SyncError::Startup("pull interval must be positive".into()));
        }

        let catalog = match &self.settings.pull_set {
            Some(set) => self.catalog.clone().with_pull_set(set),
            None => self.catalog.clone(),
        };
        let pull_enabled = self.pull.is_some() && catalog.pull_collections().next().is_some();

        let ctx = SyncContext {
            store: Arc::clone(&self.store),
            guard: Arc::new(RestoreGuard::new(
                Arc::clone(&self.marker),
                Arc::clone(&self.clock),
                self.settings.restore_window,
            )),
            status: Arc::new(SyncStatusAggregator::new(
                self.push.is_some(),
                pull_enabled,
                Arc::clone(&self.clock),
            )),
            pending: PendingWrites::new(),
            catalog: Arc::new(catalog),
            clock: Arc::clone(&self.clock),
            transformer: RecordTransformer::new(),
            cancel: CancellationToken::new(),
        };

        let push = self.push.as_ref().map(|remote| {
            PushSyncController::new(
                ctx.clone(),
                Arc::clone(remote),
                self.settings.dedup_delete_limit,
            )
        });
        let pull = self
            .pull
            .as_ref()
            .filter(|_| pull_enabled)
            .map(|remote| {
                PullSyncController::new(ctx.clone(), Arc::clone(remote), self.settings.pull_interval)
            });
        let gateway = WriteThroughGateway::new(ctx.clone(), self.push.clone(), self.pull.clone());

        let id = SessionId::new();
        let suppressed = ctx.guard.is_suppressed().await;
        info!(
            session = %id,
            push = push.is_some(),
            pull = pull.is_some(),
            suppressed,
            "Starting sync session"
        );

        if suppressed {
            ctx.status.mark_connected_idle();
        }

        let mut handles = Vec::new();
        let mut tasks = Vec::new();

        if let Some(push) = &push {
            // Subscriptions stay open while suppressed so snapshots after
            // the window are merged; each snapshot checks the guard itself.
            if !suppressed {
                ctx.status.begin_initial(Channel::Push);
            }
            let startup = push.open_subscriptions().await;
            if !suppressed {
                ctx.status
                    .finish_initial(Channel::Push, startup.is_established());
            }
            if !startup.failed.is_empty() {
                warn!(failed = ?startup.failed, "Some push subscriptions could not be opened");
            }
            handles.extend(startup.handles);
            tasks.extend(startup.tasks);
        }

        if let Some(pull) = &pull {
            if !suppressed {
                pull.initial_pass().await;
            }
            tasks.push(pull.spawn_ticker());
        }

        Ok(SyncSession {
            id,
            started_at: ctx.clock.now(),
            ctx,
            gateway,
            push,
            pull,
            handles,
            tasks,
        })
    }
}

// ============================================================================
// SyncSession
// ============================================================================

/// A running sync session
///
/// Dropping a session without [`SyncSession::teardown`] still cancels its
/// work and releases its subscriptions, but does not wait for its tasks.
pub struct SyncSession {
    id: SessionId,
    started_at: DateTime<Utc>,
    ctx: SyncContext,
    gateway: WriteThroughGateway,
    push: Option<PushSyncController>,
    pull: Option<PullSyncController>,
    handles: Vec<SubscriptionHandle>,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncSession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Current status
    pub fn status(&self) -> SyncStatus {
        self.ctx.status.status()
    }

    /// Receiver woken on every status change
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.ctx.status.subscribe()
    }

    /// Entry point for local mutations
    pub fn gateway(&self) -> &WriteThroughGateway {
        &self.gateway
    }

    /// The session's restore guard
    pub fn guard(&self) -> &RestoreGuard {
        &self.ctx.guard
    }

    /// Shared state of the session
    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    pub fn push(&self) -> Option<&PushSyncController> {
        self.push.as_ref()
    }

    pub fn pull(&self) -> Option<&PullSyncController> {
        self.pull.as_ref()
    }

    /// Runs a pull pass now; `None` when the pull channel is disabled
    pub async fn request_pull(&self) -> Option<PassOutcome> {
        match &self.pull {
            Some(pull) => Some(pull.request_pass().await),
            None => None,
        }
    }

    /// Number of live subscription handles
    pub fn live_subscriptions(&self) -> usize {
        self.handles.len()
    }

    /// Returns true once teardown has started
    pub fn is_torn_down(&self) -> bool {
        self.ctx.is_torn_down()
    }

    /// Stops the session
    ///
    /// Cancels the ticker and the listeners, releases every subscription
    /// handle once, then waits for the listener tasks to finish.
    pub async fn teardown(mut self) {
        self.ctx.cancel.cancel();

        let released = self.handles.len();
        for handle in self.handles.drain(..) {
            handle.release();
        }

        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "Sync task ended abnormally");
            }
        }

        info!(session = %self.id, released, "Sync session torn down");
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        // Handles left here release themselves on drop
        self.ctx.cancel.cancel();
    }
}
