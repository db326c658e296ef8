//! Daemon service
//!
//! Owns the configuration and the local database, builds the sync engine
//! from them and runs one sync session until shutdown is signalled.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{json, Map, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tokosync_cache::{DatabasePool, SqliteCollectionStore};
use tokosync_core::config::Config;
use tokosync_core::domain::Collection;
use tokosync_core::ports::ICollectionStore;
use tokosync_remote::{TableStoreClient, TreeStoreClient};
use tokosync_sync::{EngineSettings, RestoreGuard, SyncEngine, SyncStatus, SystemClock};

// ============================================================================
// DaemonService
// ============================================================================

/// Orchestrates the local store, the remotes and the sync session
pub struct DaemonService {
    config: Config,
    pool: DatabasePool,
    store: Arc<SqliteCollectionStore>,
    shutdown: CancellationToken,
}

impl DaemonService {
    /// Opens the database named by the config, creating its directory
    pub async fn open(config: Config, shutdown: CancellationToken) -> Result<Self> {
        let db_path = config.store.database.clone();
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let pool = DatabasePool::new(&db_path)
            .await
            .context("Failed to open database")?;
        let store = Arc::new(SqliteCollectionStore::new(pool.pool().clone()));
        info!(database = %db_path.display(), "Opened local store");

        Ok(Self {
            config,
            pool,
            store,
            shutdown,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Builds an engine with every remote the config enables
    pub fn build_engine(&self) -> Result<SyncEngine> {
        let settings = EngineSettings::from_config(&self.config)?;
        let mut engine = SyncEngine::new(self.store.clone(), self.store.clone()).with_settings(settings);

        if self.config.push_enabled() {
            let remote = TreeStoreClient::new(
                self.config.push_remote.base_url.trim(),
                self.config.push_remote.auth_token.clone(),
            );
            info!(base_url = remote.base_url(), "Push remote configured");
            engine = engine.with_push_remote(Arc::new(remote));
        }
        if self.config.pull_enabled() {
            let remote = TableStoreClient::new(
                self.config.pull_remote.base_url.trim(),
                self.config.pull_remote.api_key.clone(),
            );
            info!(base_url = remote.base_url(), "Pull remote configured");
            engine = engine.with_pull_remote(Arc::new(remote));
        }

        Ok(engine)
    }

    /// Restore guard backed by the local store
    pub fn restore_guard(&self) -> RestoreGuard {
        RestoreGuard::new(
            self.store.clone(),
            Arc::new(SystemClock),
            self.config.restore_window(),
        )
    }

    /// Runs a sync session until shutdown
    pub async fn run(&self) -> Result<()> {
        if !self.config.push_enabled() && !self.config.pull_enabled() {
            warn!("No remote configured; local writes will not be forwarded");
        }

        let engine = self.build_engine()?;
        let session = engine.start().await.context("Failed to start sync session")?;
        info!(
            session = %session.id(),
            subscriptions = session.live_subscriptions(),
            "Sync session running"
        );

        let logger = spawn_status_logger(session.subscribe_status(), self.shutdown.child_token());

        self.shutdown.cancelled().await;
        info!("Shutdown signal received");

        session.teardown().await;
        if let Err(e) = logger.await {
            warn!(error = %e, "Status logger ended abnormally");
        }
        self.pool.close().await;
        Ok(())
    }

    /// Local record counts and restore guard state
    pub async fn status_report(&self) -> Result<Value> {
        let mut counts = Map::new();
        for collection in Collection::ALL {
            let count = self
                .store
                .count(collection)
                .await
                .with_context(|| format!("Failed to count {collection}"))?;
            counts.insert(collection.to_string(), json!(count));
        }

        let guard = self.restore_guard();
        let suppressed = guard.is_suppressed().await;
        let last_restore = guard.last_restore().await;

        Ok(json!({
            "database": self.config.store.database.display().to_string(),
            "push_remote": self.config.push_enabled(),
            "pull_remote": self.config.pull_enabled(),
            "last_restore": last_restore.map(|at| at.to_rfc3339()),
            "restore_guard_active": suppressed,
            "collections": counts,
        }))
    }
}

/// Logs every status change until cancelled or the session ends
fn spawn_status_logger(
    mut status: watch::Receiver<SyncStatus>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = *status.borrow_and_update();
                    info!(
                        connected = current.connected,
                        syncing = current.syncing,
                        last_sync = ?current.last_sync_time,
                        "Sync status changed"
                    );
                }
            }
        }
    })
}
