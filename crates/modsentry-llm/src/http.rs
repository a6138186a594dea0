//! HTTP plumbing shared by the backends: client construction and mapping of
//! non-success responses onto [`BackendError`].

use std::time::Duration;

use tracing::warn;

use crate::error::{BackendError, excerpt};

/// Default wait when a 429 carries no hint.
const DEFAULT_RETRY_AFTER_MS: u64 = 1000;

pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client, BackendError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| BackendError::FatalConfig(format!("failed to build http client: {e}")))
}

/// Consume a non-success response and classify it.
///
/// - 429 is a rate limit, unless the body says the quota or credits are gone
/// - 401/403 means the credentials were rejected
/// - 404 means the model (or endpoint) does not exist
/// - 5xx is an outage
/// - any other 4xx means we sent something the backend cannot use
pub(crate) async fn error_for_status(
    provider: &str,
    model: &str,
    response: reqwest::Response,
) -> BackendError {
    let status = response.status().as_u16();
    let header_ms = parse_retry_after_header(&response);
    let body = response.text().await.unwrap_or_default();
    classify_status(provider, model, status, header_ms, &body)
}

pub(crate) fn classify_status(
    provider: &str,
    model: &str,
    status: u16,
    retry_after_header_ms: Option<u64>,
    body: &str,
) -> BackendError {
    let message = extract_error_message(body).unwrap_or_else(|| excerpt(body));

    match status {
        429 => {
            if is_quota_exhausted(body) {
                warn!(provider, "quota exhausted (not retryable)");
                return BackendError::FatalConfig(format!("quota exhausted: {message}"));
            }
            let retry_after_ms = retry_after_header_ms
                .or_else(|| parse_retry_after_ms(body))
                .unwrap_or(DEFAULT_RETRY_AFTER_MS);
            warn!(provider, retry_after_ms, "rate limited");
            BackendError::RateLimited { retry_after_ms }
        }
        401 | 403 => BackendError::FatalConfig(format!("authentication rejected: {message}")),
        402 => BackendError::FatalConfig(format!("payment required: {message}")),
        404 => BackendError::FatalConfig(format!("model '{model}' not found: {message}")),
        400 if is_invalid_key(body) => {
            BackendError::FatalConfig(format!("authentication rejected: {message}"))
        }
        500..=599 => BackendError::Unavailable(format!("HTTP {status}: {message}")),
        _ => BackendError::Malformed {
            reason: format!("HTTP {status}: request rejected"),
            excerpt: excerpt(body),
        },
    }
}

/// Whether a 429 body describes permanent quota/credit exhaustion rather than
/// a transient rate limit.
fn is_quota_exhausted(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("exhausted")
        || lower.contains("spending limit")
        || lower.contains("credits")
        || lower.contains("billing")
        || lower.contains("quota exceeded")
        || lower.contains("insufficient_quota")
        || lower.contains("insufficient balance")
}

/// Gemini reports a bad key as HTTP 400 `API_KEY_INVALID`.
fn is_invalid_key(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("api_key_invalid") || lower.contains("api key not valid")
}

/// Extract a human-readable error message from a JSON error body.
pub(crate) fn extract_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value.get("error").and_then(|v| {
        // {"error": {"message": "..."}} (OpenAI, Gemini)
        v.get("message")
            .and_then(|m| m.as_str())
            .map(String::from)
            // {"error": "..."} (Ollama)
            .or_else(|| v.as_str().map(String::from))
    })
}

/// Numeric `Retry-After` header, in milliseconds.
fn parse_retry_after_header(response: &reqwest::Response) -> Option<u64> {
    let value = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())?;
    value
        .trim()
        .parse::<f64>()
        .ok()
        .map(|secs| (secs * 1000.0).max(0.0) as u64)
}

/// `retry_after_ms` / `retry_after` (seconds) in a JSON error body.
fn parse_retry_after_ms(body: &str) -> Option<u64> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("retry_after_ms")
        .and_then(|v| v.as_u64())
        .or_else(|| {
            value
                .get("retry_after")
                .and_then(|v| v.as_f64())
                .map(|secs| (secs * 1000.0) as u64)
        })
}
