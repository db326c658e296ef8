//! Throttling support shared by both remotes
//!
//! A 429 response is retried after the delay named by its `Retry-After`
//! header, up to [`DEFAULT_MAX_RETRIES`] times. Other statuses are returned
//! to the caller untouched.

use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};
use tracing::{info, warn};

use crate::RemoteError;

/// Delay used when a 429 carries no usable `Retry-After`
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);

/// Retries granted to a throttled request
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Longest `Retry-After` honored from an HTTP-date
const MAX_RETRY_AFTER_SECS: u64 = 3600;

/// Parses a Retry-After header value into a Duration.
///
/// The header can be either:
/// - An integer number of seconds (e.g., "30")
/// - An HTTP-date (e.g., "Fri, 31 Dec 2027 23:59:59 GMT"), taken relative to now
///
/// Falls back to `default` if parsing fails.
pub fn parse_retry_after(value: &str, default: Duration) -> Duration {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Duration::from_secs(seconds);
    }

    if let Ok(date) = chrono::DateTime::parse_from_rfc2822(value) {
        let wait = date.with_timezone(&chrono::Utc) - chrono::Utc::now();
        if let Some(secs) = u64::try_from(wait.num_seconds())
            .ok()
            .filter(|&s| s <= MAX_RETRY_AFTER_SECS)
        {
            return Duration::from_secs(secs);
        }
    }

    warn!(value, "Could not parse Retry-After header, using default");
    default
}

/// Sends the request built by `build`, retrying while the remote answers 429
///
/// `build` is called once per attempt because a sent request cannot be
/// reused.
///
/// # Errors
/// Returns [`RemoteError::NetworkError`] if the request cannot be sent and
/// [`RemoteError::TooManyRequests`] once the retries are exhausted.
pub async fn send_with_retry<F>(build: F, label: &str) -> Result<Response, RemoteError>
where
    F: Fn() -> RequestBuilder,
{
    for attempt in 0..=DEFAULT_MAX_RETRIES {
        let response = build().send().await?;

        if response.status() != StatusCode::TOO_MANY_REQUESTS {
            if attempt > 0 {
                info!(label, attempt, "Request succeeded after retry");
            }
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(|v| parse_retry_after(v, DEFAULT_RETRY_AFTER))
            .unwrap_or(DEFAULT_RETRY_AFTER);

        if attempt == DEFAULT_MAX_RETRIES {
            warn!(label, attempts = attempt + 1, "429 retry limit exhausted");
            return Err(RemoteError::TooManyRequests { retry_after });
        }

        info!(
            label,
            attempt,
            retry_after_ms = retry_after.as_millis() as u64,
            "Received 429, backing off"
        );
        tokio::time::sleep(retry_after).await;
    }

    Err(RemoteError::TooManyRequests {
        retry_after: DEFAULT_RETRY_AFTER,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(
            parse_retry_after("30", Duration::from_secs(60)),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_parse_retry_after_with_whitespace() {
        assert_eq!(
            parse_retry_after("  45  ", Duration::from_secs(60)),
            Duration::from_secs(45)
        );
    }

    #[test]
    fn test_parse_retry_after_invalid_falls_back() {
        let default = Duration::from_secs(60);
        assert_eq!(parse_retry_after("not-a-number", default), default);
        assert_eq!(parse_retry_after("", default), default);
    }

    #[test]
    fn test_parse_retry_after_past_date_falls_back() {
        let default = Duration::from_secs(7);
        let past = "Mon, 01 Jan 2001 00:00:00 +0000";
        assert_eq!(parse_retry_after(past, default), default);
    }

    #[test]
    fn test_parse_retry_after_future_date() {
        let target = chrono::Utc::now() + chrono::Duration::seconds(120);
        let parsed = parse_retry_after(&target.to_rfc2822(), Duration::from_secs(1));
        assert!(parsed <= Duration::from_secs(120));
        assert!(parsed >= Duration::from_secs(100));
    }
}
