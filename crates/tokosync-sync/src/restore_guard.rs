//! Post-restore sync suppression
//!
//! When a backup is restored locally, remote snapshots that arrive right
//! afterwards would overwrite the restored data with whatever the remotes
//! still hold. [`RestoreGuard`] suppresses every inbound merge for a fixed
//! window after [`RestoreGuard::mark_restored`].
//!
//! The marker is persisted through [`IRestoreMarkerStore`] so the window
//! survives a restart. Once the window has elapsed the stored timestamp is
//! ignored; it is never deleted.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use tokosync_core::ports::IRestoreMarkerStore;

/// Default length of the protection window (5 minutes)
pub const DEFAULT_RESTORE_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Source of the current time
///
/// Injected so tests can move time without sleeping.
pub trait Clock: Send + Sync {
    /// Current wall-clock time
    fn now(&self) -> DateTime<Utc>;
}

/// [`Clock`] backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Time-windowed suppression of inbound merges
pub struct RestoreGuard {
    marker: Arc<dyn IRestoreMarkerStore>,
    clock: Arc<dyn Clock>,
    window: chrono::Duration,
    /// Last marker value seen; used when the marker store cannot be read
    last_known: RwLock<Option<DateTime<Utc>>>,
}

impl RestoreGuard {
    /// Creates a guard over the given marker store
    pub fn new(
        marker: Arc<dyn IRestoreMarkerStore>,
        clock: Arc<dyn Clock>,
        window: Duration,
    ) -> Self {
        let window =
            chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
        Self {
            marker,
            clock,
            window,
            last_known: RwLock::new(None),
        }
    }

    /// Length of the protection window
    pub fn window(&self) -> chrono::Duration {
        self.window
    }

    /// Records that a restore completed now
    ///
    /// Called by the restore feature, never by the engine itself.
    ///
    /// # Errors
    /// Returns the marker store's error if the timestamp cannot be persisted.
    /// The in-process guard is armed regardless.
    pub async fn mark_restored(&self) -> anyhow::Result<DateTime<Utc>> {
        let now = self.clock.now();
        *self.last_known.write().await = Some(now);
        self.marker.save_last_restore(now).await?;
        info!(
            restored_at = %now,
            window_secs = self.window.num_seconds(),
            "Restore marked, inbound sync suppressed"
        );
        Ok(now)
    }

    /// Returns true if inbound merges must be skipped right now
    pub async fn is_suppressed(&self) -> bool {
        let last = match self.marker.load_last_restore().await {
            Ok(Some(at)) => {
                *self.last_known.write().await = Some(at);
                Some(at)
            }
            Ok(None) => *self.last_known.read().await,
            Err(e) => {
                warn!(error = %e, "Failed to read restore marker, using last known value");
                *self.last_known.read().await
            }
        };

        let suppressed = suppressed_at(last, self.clock.now(), self.window);
        if suppressed {
            debug!(last_restore = ?last, "Restore guard active");
        }
        suppressed
    }

    /// The last restore time this guard knows of
    pub async fn last_restore(&self) -> Option<DateTime<Utc>> {
        *self.last_known.read().await
    }
}

/// Pure suppression predicate: `now - last_restore < window`
pub fn suppressed_at(
    last_restore: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    window: chrono::Duration,
) -> bool {
    match last_restore {
        Some(at) => now.signed_duration_since(at) < window,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{ManualClock, MemoryRestoreMarker};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap()
    }

    fn guard(marker: &Arc<MemoryRestoreMarker>, clock: &Arc<ManualClock>) -> RestoreGuard {
        RestoreGuard::new(marker.clone(), clock.clone(), DEFAULT_RESTORE_WINDOW)
    }

    #[test]
    fn test_suppressed_at_boundaries() {
        let window = chrono::Duration::minutes(5);
        assert!(!suppressed_at(None, t0(), window));
        assert!(suppressed_at(Some(t0()), t0(), window));
        assert!(suppressed_at(
            Some(t0()),
            t0() + chrono::Duration::seconds(299),
            window
        ));
        assert!(!suppressed_at(Some(t0()), t0() + window, window));
    }

    #[tokio::test]
    async fn test_not_suppressed_without_marker() {
        let marker = Arc::new(MemoryRestoreMarker::new());
        let clock = Arc::new(ManualClock::new(t0()));
        assert!(!guard(&marker, &clock).is_suppressed().await);
    }

    #[tokio::test]
    async fn test_window_expires() {
        let marker = Arc::new(MemoryRestoreMarker::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let guard = guard(&marker, &clock);

        guard.mark_restored().await.unwrap();
        assert_eq!(marker.stored(), Some(t0()));

        clock.advance(chrono::Duration::minutes(2));
        assert!(guard.is_suppressed().await);

        clock.advance(chrono::Duration::minutes(4));
        assert!(!guard.is_suppressed().await);
    }

    #[tokio::test]
    async fn test_marker_survives_new_guard() {
        let marker = Arc::new(MemoryRestoreMarker::new());
        let clock = Arc::new(ManualClock::new(t0()));
        guard(&marker, &clock).mark_restored().await.unwrap();

        clock.advance(chrono::Duration::minutes(1));
        let fresh = guard(&marker, &clock);
        assert!(fresh.is_suppressed().await);
        assert_eq!(fresh.last_restore().await, Some(t0()));
    }

    #[tokio::test]
    async fn test_unreadable_marker_falls_back_to_last_known() {
        let marker = Arc::new(MemoryRestoreMarker::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let guard = guard(&marker, &clock);
        guard.mark_restored().await.unwrap();

        marker.set_failing(true);
        clock.advance(chrono::Duration::minutes(1));
        assert!(guard.is_suppressed().await);
    }

    #[tokio::test]
    async fn test_mark_restored_arms_guard_even_if_save_fails() {
        let marker = Arc::new(MemoryRestoreMarker::new());
        marker.set_failing(true);
        let clock = Arc::new(ManualClock::new(t0()));
        let guard = guard(&marker, &clock);

        assert!(guard.mark_restored().await.is_err());
        assert!(guard.is_suppressed().await);
    }
}
