//! Tree store client (push remote)
//!
//! The tree store exposes every node of a JSON document at
//! `{base_url}/{path}.json`. Reads and writes are plain REST calls; a GET
//! with `Accept: text/event-stream` keeps the connection open and streams
//! `put`/`patch` events for everything under the node.
//!
//! ## Subscriptions
//!
//! [`TreeStoreClient::subscribe`] opens the stream before returning, so a
//! path that cannot be reached fails the call. A background listener then
//! turns events into full snapshots of the subscribed path:
//!
//! - a `put` at `/` carries the whole node and is forwarded as is
//! - any other `put` or `patch` only describes a change below the node, so
//!   the listener re-reads the node and forwards the result
//!
//! A dropped stream is reopened with a capped exponential backoff. The
//! listener stops when its handle is released, when the receiver is gone, or
//! when the server cancels the stream.

use std::time::Duration;

use anyhow::Context;
use futures_util::StreamExt;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tokosync_core::ports::{IPushRemote, Subscription, SubscriptionHandle};

use crate::retry::send_with_retry;
use crate::sse::{SseEvent, SseParser};
use crate::{check_status, RemoteError};

/// First delay before reopening a dropped stream
const RECONNECT_INITIAL: Duration = Duration::from_secs(1);

/// Longest delay between reconnect attempts
const RECONNECT_MAX: Duration = Duration::from_secs(30);

/// Snapshots buffered per subscription before the listener waits
const SNAPSHOT_BUFFER: usize = 16;

// ============================================================================
// TreeStoreClient
// ============================================================================

/// HTTP client for the tree store
#[derive(Debug, Clone)]
pub struct TreeStoreClient {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
}

/// Body of a `put` or `patch` event
#[derive(Debug, Deserialize)]
struct ChangeEvent {
    path: String,
    #[serde(default)]
    data: Value,
}

impl TreeStoreClient {
    /// Creates a client for the tree store at `base_url`
    ///
    /// # Arguments
    /// * `base_url` - Root of the store, e.g. `https://store.example.com`
    /// * `auth_token` - Sent as the `auth` query parameter when present
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL of the node at `path`
    pub fn node_url(&self, path: &str) -> String {
        let path = path.trim_matches('/');
        if path.is_empty() {
            format!("{}/.json", self.base_url)
        } else {
            format!("{}/{}.json", self.base_url, path)
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.node_url(path));
        match &self.auth_token {
            Some(token) => builder.query(&[("auth", token.as_str())]),
            None => builder,
        }
    }

    /// Reads the node at `path`; `None` when the node holds nothing
    pub async fn get(&self, path: &str) -> Result<Option<Value>, RemoteError> {
        let response = send_with_retry(|| self.request(Method::GET, path), path).await?;
        let response = check_status(response).await?;
        let value: Value = response
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
        Ok(match value {
            Value::Null => None,
            other => Some(other),
        })
    }

    /// Replaces the node at `path`
    pub async fn put(&self, path: &str, value: &Value) -> Result<(), RemoteError> {
        let response =
            send_with_retry(|| self.request(Method::PUT, path).json(value), path).await?;
        check_status(response).await?;
        Ok(())
    }

    /// Merges the top-level fields of `patch` into the node at `path`
    pub async fn patch(&self, path: &str, patch: &Value) -> Result<(), RemoteError> {
        let response =
            send_with_retry(|| self.request(Method::PATCH, path).json(patch), path).await?;
        check_status(response).await?;
        Ok(())
    }

    /// Deletes the node at `path`
    pub async fn remove(&self, path: &str) -> Result<(), RemoteError> {
        let response = send_with_retry(|| self.request(Method::DELETE, path), path).await?;
        check_status(response).await?;
        Ok(())
    }

    /// Opens the event stream of `path`
    async fn open_stream(&self, path: &str) -> Result<Response, RemoteError> {
        let response = self
            .request(Method::GET, path)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        check_status(response).await
    }
}

// ============================================================================
// Stream listener
// ============================================================================

/// Why a stream stopped delivering
enum StreamEnd {
    /// Handle released or receiver dropped
    Stopped,
    /// Server cancelled the stream or revoked the credentials
    Cancelled,
    /// Connection dropped; reopen it
    Dropped,
}

struct Listener {
    client: TreeStoreClient,
    path: String,
    tx: mpsc::Sender<Option<Value>>,
    cancel: CancellationToken,
}

impl Listener {
    async fn run(self, first: Response) {
        let mut response = Some(first);
        let mut backoff = RECONNECT_INITIAL;

        loop {
            let stream = match response.take() {
                Some(stream) => stream,
                None => {
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    match self.client.open_stream(&self.path).await {
                        Ok(stream) => {
                            info!(path = %self.path, "Event stream reopened");
                            backoff = RECONNECT_INITIAL;
                            stream
                        }
                        Err(e) => {
                            backoff = (backoff * 2).min(RECONNECT_MAX);
                            warn!(
                                path = %self.path,
                                error = %e,
                                retry_in_ms = backoff.as_millis() as u64,
                                "Could not reopen event stream"
                            );
                            continue;
                        }
                    }
                }
            };

            match self.consume(stream).await {
                StreamEnd::Stopped => break,
                StreamEnd::Cancelled => {
                    warn!(path = %self.path, "Event stream cancelled by the server");
                    break;
                }
                StreamEnd::Dropped => {
                    debug!(path = %self.path, "Event stream dropped");
                }
            }
        }

        debug!(path = %self.path, "Listener stopped");
    }

    async fn consume(&self, response: Response) -> StreamEnd {
        let mut parser = SseParser::new();
        let mut body = response.bytes_stream();

        loop {
            let chunk = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return StreamEnd::Stopped,
                chunk = body.next() => chunk,
            };

            let bytes = match chunk {
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => {
                    warn!(path = %self.path, error = %e, "Event stream read failed");
                    return StreamEnd::Dropped;
                }
                None => return StreamEnd::Dropped,
            };

            for event in parser.feed(&bytes) {
                if let Some(end) = self.handle_event(event).await {
                    return end;
                }
            }
        }
    }

    async fn handle_event(&self, event: SseEvent) -> Option<StreamEnd> {
        let snapshot = match event.event.as_str() {
            "put" | "patch" => {
                let change: ChangeEvent = match serde_json::from_str(&event.data) {
                    Ok(change) => change,
                    Err(e) => {
                        warn!(path = %self.path, error = %e, "Malformed change event");
                        return None;
                    }
                };
                if event.event == "put" && change.path == "/" {
                    match change.data {
                        Value::Null => None,
                        other => Some(other),
                    }
                } else {
                    match self.client.get(&self.path).await {
                        Ok(snapshot) => snapshot,
                        Err(e) => {
                            warn!(path = %self.path, error = %e, "Could not re-read node after change");
                            return None;
                        }
                    }
                }
            }
            "keep-alive" => return None,
            "cancel" | "auth_revoked" => return Some(StreamEnd::Cancelled),
            other => {
                debug!(path = %self.path, event = other, "Ignoring stream event");
                return None;
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Some(StreamEnd::Stopped),
            sent = self.tx.send(snapshot) => match sent {
                Ok(()) => None,
                Err(_) => Some(StreamEnd::Stopped),
            },
        }
    }
}

// ============================================================================
// IPushRemote implementation
// ============================================================================

#[async_trait::async_trait]
impl IPushRemote for TreeStoreClient {
    async fn subscribe(&self, path: &str) -> anyhow::Result<Subscription> {
        let response = self
            .open_stream(path)
            .await
            .with_context(|| format!("Failed to open event stream for {path}"))?;

        let (tx, rx) = mpsc::channel(SNAPSHOT_BUFFER);
        let cancel = CancellationToken::new();
        let listener = Listener {
            client: self.clone(),
            path: path.to_string(),
            tx,
            cancel: cancel.clone(),
        };
        tokio::spawn(listener.run(response));

        debug!(path, "Subscribed to tree node");
        Ok(Subscription {
            path: path.to_string(),
            snapshots: rx,
            handle: SubscriptionHandle::new(path, move || cancel.cancel()),
        })
    }

    async fn read_once(&self, path: &str) -> anyhow::Result<Option<Value>> {
        self.get(path)
            .await
            .with_context(|| format!("Failed to read {path}"))
    }

    async fn write_full(&self, path: &str, value: &Value) -> anyhow::Result<()> {
        self.put(path, value)
            .await
            .with_context(|| format!("Failed to write {path}"))
    }

    async fn write_patch(&self, path: &str, patch: &Value) -> anyhow::Result<()> {
        self.patch(path, patch)
            .await
            .with_context(|| format!("Failed to patch {path}"))
    }

    async fn delete(&self, path: &str) -> anyhow::Result<()> {
        self.remove(path)
            .await
            .with_context(|| format!("Failed to delete {path}"))
    }
}
