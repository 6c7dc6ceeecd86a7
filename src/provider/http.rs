//! Shared HTTP client, SSE parsing, and error mapping.

use std::sync::OnceLock;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};

use crate::error::StewardError;

static SHARED_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

/// Get (or create) the shared reqwest client.
pub fn shared_client() -> &'static reqwest::Client {
    SHARED_CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .pool_max_idle_per_host(10)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new())
    })
}

/// Headers for the Gemini API (x-goog-api-key).
pub fn gemini_headers(api_key: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(val) = HeaderValue::from_str(api_key) {
        headers.insert("x-goog-api-key", val);
    }
    headers
}

/// Parse an SSE "data:" line, returning None for "[DONE]" and non-data lines.
pub fn parse_sse_data(line: &str) -> Option<&str> {
    let data = line
        .strip_prefix("data: ")
        .or_else(|| line.strip_prefix("data:"))?;
    if data == "[DONE]" {
        return None;
    }
    Some(data)
}

/// Map a non-success HTTP status to an error.
///
/// `retry_after` is the raw `Retry-After` header, if the server sent one.
pub fn status_to_error(status: u16, body: &str, retry_after: Option<&str>) -> StewardError {
    match status {
        401 | 403 => StewardError::Authentication(error_message(body)),
        429 => StewardError::RateLimited {
            retry_after_ms: retry_after
                .and_then(parse_retry_after_header)
                .or_else(|| extract_retry_delay(body)),
        },
        _ => StewardError::api(status, error_message(body)),
    }
}

/// `{"error": {"message": ..}}` when present, the raw body otherwise.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

fn parse_retry_after_header(value: &str) -> Option<u64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| *secs >= 0.0)
        .map(|secs| (secs * 1000.0) as u64)
}

/// Gemini reports server-suggested delays as `RetryInfo.retryDelay` ("30s").
fn extract_retry_delay(body: &str) -> Option<u64> {
    let value = serde_json::from_str::<serde_json::Value>(body).ok()?;
    let details = value.get("error")?.get("details")?.as_array()?;
    details.iter().find_map(|detail| {
        let delay = detail.get("retryDelay")?.as_str()?;
        let secs = delay.strip_suffix('s')?.parse::<f64>().ok()?;
        Some((secs * 1000.0) as u64)
    })
}
