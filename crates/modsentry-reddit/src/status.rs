//! Mapping of Reddit HTTP failures onto [`SourceError`].

use modsentry_types::SourceError;
use tracing::warn;

const DEFAULT_RETRY_AFTER_MS: u64 = 1000;

/// Consume a non-success response and classify it.
pub(crate) async fn error_for_status(what: &str, response: reqwest::Response) -> SourceError {
    let status = response.status().as_u16();
    let retry_after_ms = retry_after_ms(response.headers());
    let body = response.text().await.unwrap_or_default();
    classify_status(what, status, retry_after_ms, &body)
}

pub(crate) fn classify_status(
    what: &str,
    status: u16,
    retry_after_ms: Option<u64>,
    body: &str,
) -> SourceError {
    let message = error_message(body).unwrap_or_else(|| body.chars().take(200).collect());
    match status {
        401 | 403 => SourceError::Permission(format!("{what}: HTTP {status}: {message}")),
        404 => SourceError::NotFound(format!("{what}: {message}")),
        429 => {
            let retry_after_ms = retry_after_ms.unwrap_or(DEFAULT_RETRY_AFTER_MS);
            warn!(op = what, retry_after_ms, "reddit rate limit hit");
            SourceError::RateLimited { retry_after_ms }
        }
        500..=599 => SourceError::Transient(format!("{what}: HTTP {status}")),
        // Anything else was a request Reddit will not accept as sent.
        _ => SourceError::Permission(format!("{what}: rejected with HTTP {status}: {message}")),
    }
}

/// Network-level failure (connect, timeout, unreadable body).
pub(crate) fn transport_error(what: &str, err: reqwest::Error) -> SourceError {
    SourceError::Transient(format!("{what}: {err}"))
}

/// `Retry-After` (seconds) or Reddit's `x-ratelimit-reset` (seconds until the
/// window resets), in milliseconds.
pub(crate) fn retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    ["retry-after", "x-ratelimit-reset"].iter().find_map(|name| {
        headers
            .get(*name)?
            .to_str()
            .ok()?
            .trim()
            .parse::<f64>()
            .ok()
            .map(|secs| (secs.max(0.0) * 1000.0) as u64)
    })
}

/// `{"message": ..}` or `{"error": ..}` as Reddit returns them.
fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("message")
        .and_then(|m| m.as_str())
        .map(String::from)
        .or_else(|| match value.get("error")? {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_statuses() {
        assert!(matches!(
            classify_status("remove", 403, None, r#"{"message": "Forbidden", "error": 403}"#),
            SourceError::Permission(m) if m.contains("Forbidden")
        ));
        assert!(matches!(
            classify_status("remove", 401, None, ""),
            SourceError::Permission(_)
        ));
        assert!(matches!(
            classify_status("info", 404, None, ""),
            SourceError::NotFound(_)
        ));
        assert_eq!(
            classify_status("list", 429, Some(3000), ""),
            SourceError::RateLimited {
                retry_after_ms: 3000
            }
        );
        assert_eq!(
            classify_status("list", 429, None, ""),
            SourceError::RateLimited {
                retry_after_ms: 1000
            }
        );
        assert!(classify_status("list", 502, None, "<html>").is_transient());
        assert!(!classify_status("list", 400, None, "").is_transient());
    }

    #[test]
    fn retry_after_headers() {
        let mut headers = reqwest::header::HeaderMap::new();
        assert_eq!(retry_after_ms(&headers), None);
        headers.insert("x-ratelimit-reset", "12".parse().unwrap());
        assert_eq!(retry_after_ms(&headers), Some(12_000));
        headers.insert("retry-after", "2".parse().unwrap());
        assert_eq!(retry_after_ms(&headers), Some(2_000));
    }
}
