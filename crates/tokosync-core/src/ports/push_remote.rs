//! Push remote port (driven/secondary port)
//!
//! The push remote is a hierarchical store that delivers a full snapshot of
//! a path every time anything under it changes. Writes replace or patch a
//! whole record at `{collection_path}/{id}`.
//!
//! ## Design Notes
//!
//! - A subscription is a channel of raw snapshots plus a
//!   [`SubscriptionHandle`]. `None` on the channel means the path currently
//!   holds nothing.
//! - The handle releases the underlying listener exactly once: either an
//!   explicit [`SubscriptionHandle::release`] or, failing that, on drop.

use std::fmt;

use serde_json::Value;
use tokio::sync::mpsc;

/// Releases a live listener on the push remote
pub struct SubscriptionHandle {
    path: String,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionHandle {
    /// Creates a handle that runs `release` when the subscription ends
    pub fn new(path: impl Into<String>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            path: path.into(),
            release: Some(Box::new(release)),
        }
    }

    /// Path the listener is attached to
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Detaches the listener
    pub fn release(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("path", &self.path)
            .field("live", &self.release.is_some())
            .finish()
    }
}

/// A live subscription to one path
#[derive(Debug)]
pub struct Subscription {
    /// Path the subscription watches
    pub path: String,
    /// Raw snapshots, in delivery order
    pub snapshots: mpsc::Receiver<Option<Value>>,
    /// Handle that detaches the listener
    pub handle: SubscriptionHandle,
}

/// Port trait for the streaming remote
#[async_trait::async_trait]
pub trait IPushRemote: Send + Sync {
    /// Opens a subscription on `path`
    ///
    /// The first snapshot is the current content of the path.
    async fn subscribe(&self, path: &str) -> anyhow::Result<Subscription>;

    /// Reads the current content of `path` once
    async fn read_once(&self, path: &str) -> anyhow::Result<Option<Value>>;

    /// Replaces the value at `path`
    async fn write_full(&self, path: &str, value: &Value) -> anyhow::Result<()>;

    /// Shallow-merges `patch` into the value at `path`
    async fn write_patch(&self, path: &str, patch: &Value) -> anyhow::Result<()>;

    /// Deletes the value at `path`
    async fn delete(&self, path: &str) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_handle(counter: &Arc<AtomicUsize>) -> SubscriptionHandle {
        let counter = Arc::clone(counter);
        SubscriptionHandle::new("products", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_release_runs_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = counting_handle(&counter);
        handle.release();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_releases_when_not_released() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let _handle = counting_handle(&counter);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_debug_shows_path() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = counting_handle(&counter);
        assert!(format!("{handle:?}").contains("products"));
    }
}
