//! Aggregated sync status
//!
//! The UI layer sees three independent flags: `connected`, `syncing` and
//! `last_sync_time`. They are derived from per-channel signals that the
//! controllers report, and published through a `tokio::sync::watch`
//! channel so observers are woken on every change.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use tokosync_core::domain::Channel;

use crate::restore_guard::Clock;

/// Read model exposed to the UI layer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    /// Initial setup of every configured channel has succeeded
    pub connected: bool,
    /// An initial pass is running
    pub syncing: bool,
    /// Last successful pull pass or initial push setup
    pub last_sync_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default)]
struct ChannelSignals {
    enabled: bool,
    initial_running: bool,
    ready: bool,
}

impl ChannelSignals {
    fn satisfied(&self) -> bool {
        !self.enabled || self.ready
    }
}

#[derive(Debug, Default)]
struct Signals {
    push: ChannelSignals,
    pull: ChannelSignals,
    last_sync_time: Option<DateTime<Utc>>,
}

impl Signals {
    fn channel_mut(&mut self, channel: Channel) -> &mut ChannelSignals {
        match channel {
            Channel::Push => &mut self.push,
            Channel::Pull => &mut self.pull,
        }
    }

    fn status(&self) -> SyncStatus {
        let any_enabled = self.push.enabled || self.pull.enabled;
        SyncStatus {
            connected: any_enabled && self.push.satisfied() && self.pull.satisfied(),
            syncing: self.push.initial_running || self.pull.initial_running,
            last_sync_time: self.last_sync_time,
        }
    }
}

/// Maintains and publishes [`SyncStatus`]
pub struct SyncStatusAggregator {
    signals: Mutex<Signals>,
    tx: watch::Sender<SyncStatus>,
    clock: Arc<dyn Clock>,
}

impl SyncStatusAggregator {
    /// Creates an aggregator for the given set of enabled channels
    pub fn new(push_enabled: bool, pull_enabled: bool, clock: Arc<dyn Clock>) -> Self {
        let signals = Signals {
            push: ChannelSignals {
                enabled: push_enabled,
                ..Default::default()
            },
            pull: ChannelSignals {
                enabled: pull_enabled,
                ..Default::default()
            },
            last_sync_time: None,
        };
        let (tx, _rx) = watch::channel(signals.status());
        Self {
            signals: Mutex::new(signals),
            tx,
            clock,
        }
    }

    fn update(&self, f: impl FnOnce(&mut Signals)) {
        let status = {
            let mut signals = self
                .signals
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            f(&mut signals);
            signals.status()
        };

        let changed = self.tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            debug!(
                connected = status.connected,
                syncing = status.syncing,
                last_sync_time = ?status.last_sync_time,
                "Sync status changed"
            );
        }
    }

    /// An initial pass of `channel` started
    pub fn begin_initial(&self, channel: Channel) {
        self.update(|s| s.channel_mut(channel).initial_running = true);
    }

    /// An initial pass of `channel` finished
    ///
    /// `ok` is false only when the pass failed as a whole; per-collection
    /// errors that were caught and logged do not count.
    pub fn finish_initial(&self, channel: Channel, ok: bool) {
        let now = self.clock.now();
        self.update(|s| {
            let signals = s.channel_mut(channel);
            signals.initial_running = false;
            if ok {
                signals.ready = true;
                s.last_sync_time = Some(now);
            }
        });
    }

    /// A routine pull pass succeeded
    pub fn record_pull_success(&self) {
        let now = self.clock.now();
        self.update(|s| {
            s.pull.ready = true;
            s.last_sync_time = Some(now);
        });
    }

    /// Startup skipped the initial passes because a restore is protected
    pub fn mark_connected_idle(&self) {
        self.update(|s| {
            for signals in [&mut s.push, &mut s.pull] {
                signals.initial_running = false;
                if signals.enabled {
                    signals.ready = true;
                }
            }
        });
    }

    /// Current status
    pub fn status(&self) -> SyncStatus {
        *self.tx.borrow()
    }

    /// Receiver woken on every status change
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ManualClock;
    use chrono::TimeZone;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0).unwrap(),
        ))
    }

    #[test]
    fn test_initial_status_is_idle_disconnected() {
        let agg = SyncStatusAggregator::new(true, true, clock());
        assert_eq!(agg.status(), SyncStatus::default());
    }

    #[test]
    fn test_connected_needs_both_channels() {
        let clock = clock();
        let agg = SyncStatusAggregator::new(true, true, clock.clone());

        agg.begin_initial(Channel::Push);
        agg.begin_initial(Channel::Pull);
        assert!(agg.status().syncing);

        agg.finish_initial(Channel::Push, true);
        let status = agg.status();
        assert!(!status.connected);
        assert!(status.syncing);
        assert_eq!(status.last_sync_time, Some(clock.now()));

        agg.finish_initial(Channel::Pull, true);
        let status = agg.status();
        assert!(status.connected);
        assert!(!status.syncing);
    }

    #[test]
    fn test_failed_initial_pull_keeps_disconnected_until_success() {
        let clock = clock();
        let agg = SyncStatusAggregator::new(false, true, clock.clone());
        agg.begin_initial(Channel::Pull);
        agg.finish_initial(Channel::Pull, false);
        assert!(!agg.status().connected);
        assert!(!agg.status().syncing);
        assert!(agg.status().last_sync_time.is_none());

        clock.advance(chrono::Duration::seconds(60));
        agg.record_pull_success();
        assert!(agg.status().connected);
        assert_eq!(agg.status().last_sync_time, Some(clock.now()));
    }

    #[test]
    fn test_connected_is_never_downgraded() {
        let agg = SyncStatusAggregator::new(true, false, clock());
        agg.finish_initial(Channel::Push, true);
        agg.begin_initial(Channel::Push);
        agg.finish_initial(Channel::Push, false);
        assert!(agg.status().connected);
    }

    #[test]
    fn test_mark_connected_idle() {
        let agg = SyncStatusAggregator::new(true, true, clock());
        agg.mark_connected_idle();
        let status = agg.status();
        assert!(status.connected);
        assert!(!status.syncing);
        assert!(status.last_sync_time.is_none());
    }

    #[test]
    fn test_no_channels_never_connected() {
        let agg = SyncStatusAggregator::new(false, false, clock());
        agg.mark_connected_idle();
        assert!(!agg.status().connected);
    }

    #[tokio::test]
    async fn test_watchers_see_changes() {
        let agg = SyncStatusAggregator::new(true, false, clock());
        let mut rx = agg.subscribe();

        agg.begin_initial(Channel::Push);
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().syncing);

        agg.finish_initial(Channel::Push, true);
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().connected);
    }
}
