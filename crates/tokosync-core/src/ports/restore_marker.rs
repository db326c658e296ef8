//! Restore marker port (driven/secondary port)
//!
//! After a backup restore the application records the moment it happened.
//! The marker survives restarts so that remote snapshots arriving right
//! after a restore cannot overwrite the restored data.

use chrono::{DateTime, Utc};

/// Port trait for persisting the last-restore timestamp
#[async_trait::async_trait]
pub trait IRestoreMarkerStore: Send + Sync {
    /// Loads the last restore time, if one was ever recorded
    async fn load_last_restore(&self) -> anyhow::Result<Option<DateTime<Utc>>>;

    /// Persists the last restore time
    async fn save_last_restore(&self, at: DateTime<Utc>) -> anyhow::Result<()>;
}
