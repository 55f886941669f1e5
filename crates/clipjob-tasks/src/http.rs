//! Shared HTTP plumbing for the provider adapters.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::{TaskApiError, TaskApiResult};

/// Build a tuned HTTP client for a provider.
pub(crate) fn build_client(timeout: Duration) -> TaskApiResult<Client> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .pool_idle_timeout(Duration::from_secs(90))
        .user_agent(concat!("clipjob-tasks/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(TaskApiError::Network)
}

/// Validate a base URL and strip the trailing slash.
pub(crate) fn normalize_base_url(base_url: &str) -> TaskApiResult<String> {
    Url::parse(base_url)
        .map_err(|e| TaskApiError::config(format!("invalid base URL {}: {}", base_url, e)))?;
    Ok(base_url.trim_end_matches('/').to_string())
}

/// Decode a success body, or classify the failure status.
pub(crate) async fn read_json<T: DeserializeOwned>(response: Response) -> TaskApiResult<T> {
    let status = response.status();

    if status.is_success() {
        let body = response.text().await?;
        return serde_json::from_str(&body).map_err(|e| {
            TaskApiError::invalid_response(format!("{} (body: {})", e, truncate(&body, 200)))
        });
    }

    let retry_after = parse_retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    Err(TaskApiError::from_http_status(
        status.as_u16(),
        truncate(&body, 500),
        retry_after,
    ))
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
