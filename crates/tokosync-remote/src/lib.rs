//! Tokosync Remote - HTTP adapters for the two remotes
//!
//! Provides:
//! - [`tree::TreeStoreClient`], the push remote: a JSON tree over REST with
//!   server-sent change events
//! - [`table::TableStoreClient`], the pull remote: a row store with a
//!   PostgREST-style query interface
//!
//! ## Modules
//!
//! - [`tree`] - Push remote adapter (`IPushRemote`)
//! - [`table`] - Pull remote adapter (`IPullRemote`)
//! - [`sse`] - Incremental parser for `text/event-stream` bodies
//! - [`retry`] - 429 handling and `Retry-After` parsing

pub mod retry;
pub mod sse;
pub mod table;
pub mod tree;

pub use table::TableStoreClient;
pub use tree::TreeStoreClient;

use std::time::Duration;

use reqwest::{Response, StatusCode};
use thiserror::Error;

/// Errors that can occur when talking to a remote
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Credentials are missing, invalid or expired
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Credentials lack permission for the request
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The path or table does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The write conflicts with existing data (e.g. duplicate key)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Rate limit exceeded; retry after the specified duration
    #[error("Too many requests, retry after {retry_after:?}")]
    TooManyRequests {
        /// Duration to wait before retrying
        retry_after: Duration,
    },

    /// A server-side error occurred (5xx)
    #[error("Server error: {0}")]
    ServerError(String),

    /// A network-level error occurred
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// The response could not be parsed or was malformed
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maps a non-success response to a [`RemoteError`], passing success through
///
/// The error carries the response body, which both remotes use for their
/// error messages.
pub async fn check_status(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().path().to_string();
    let body = response.text().await.unwrap_or_default();
    let detail = if body.is_empty() {
        format!("{status} for {url}")
    } else {
        format!("{status} for {url}: {body}")
    };

    Err(match status {
        StatusCode::UNAUTHORIZED => RemoteError::Unauthorized(detail),
        StatusCode::FORBIDDEN => RemoteError::Forbidden(detail),
        StatusCode::NOT_FOUND => RemoteError::NotFound(detail),
        StatusCode::CONFLICT => RemoteError::Conflict(detail),
        StatusCode::TOO_MANY_REQUESTS => RemoteError::TooManyRequests {
            retry_after: retry::DEFAULT_RETRY_AFTER,
        },
        s if s.is_server_error() => RemoteError::ServerError(detail),
        _ => RemoteError::InvalidResponse(detail),
    })
}
