//! HTTP surface of the relay.

use std::sync::Arc;
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::{json, Value};

use crate::error::StreamError;
use crate::observability::log_stream_complete;
use crate::state::AppState;
use crate::stream::SseTap;

const MAX_UPSTREAM_ERROR_CHARS: usize = 500;

/// Build the relay router, nested under `server.base_path` when set.
pub fn router(state: Arc<AppState>) -> Router {
    let base_path = normalize_base_path(&state.config.server.base_path);
    let routes = Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/health", get(health_handler))
        .with_state(state);

    if base_path.is_empty() {
        routes
    } else {
        Router::new().nest(&base_path, routes)
    }
}

#[must_use]
pub fn normalize_base_path(base_path: &str) -> String {
    let trimmed = base_path.trim();
    if trimmed.is_empty() || trimmed == "/" {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.trim_end_matches('/').to_string()
    } else {
        format!("/{}", trimmed.trim_end_matches('/'))
    }
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "upstream": state.endpoint(),
        "log_level": state.config.features.log_level,
    }))
}

/// Forward the request body upstream and relay the response byte-for-byte.
///
/// The streamed body passes through an [`SseTap`]; once it ends cleanly the
/// assembled content and usage are logged.
async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, StreamError> {
    let start = Instant::now();
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("application/json"));

    let mut request = state
        .client
        .post(state.endpoint())
        .header(header::CONTENT_TYPE, content_type)
        .header(header::ACCEPT, "text/event-stream")
        .body(body);
    if let Some(api_key) = state.config.upstream.api_key.as_deref() {
        request = request.bearer_auth(api_key);
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.bytes().await?;
        tracing::warn!("upstream answered {status}");
        return Err(StreamError::Upstream {
            status: status.as_u16(),
            message: sanitize_upstream_error(&body),
        });
    }

    let upstream_content_type = response.headers().get(header::CONTENT_TYPE).cloned();
    let tap = SseTap::new(response.bytes_stream())
        .on_complete(move |completion| log_stream_complete(&completion, start));

    let mut relayed = Response::new(Body::from_stream(tap));
    *relayed.status_mut() = status;
    relayed.headers_mut().insert(
        header::CONTENT_TYPE,
        upstream_content_type.unwrap_or_else(|| HeaderValue::from_static("text/event-stream")),
    );
    relayed
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    Ok(relayed)
}

/// Extract a short, human-readable message from an upstream error body.
pub(crate) fn sanitize_upstream_error(body: &[u8]) -> String {
    if let Ok(json) = serde_json::from_slice::<Value>(body) {
        // OpenAI / Anthropic: { "error": { "message": "..." } }
        if let Some(msg) = json
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
        {
            return truncate_chars(msg, MAX_UPSTREAM_ERROR_CHARS);
        }
        if let Some(msg) = json.get("error").and_then(Value::as_str) {
            return truncate_chars(msg, MAX_UPSTREAM_ERROR_CHARS);
        }
    }

    truncate_chars(&String::from_utf8_lossy(body), MAX_UPSTREAM_ERROR_CHARS)
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_path() {
        assert_eq!(normalize_base_path(""), "");
        assert_eq!(normalize_base_path("/"), "");
        assert_eq!(normalize_base_path("api/"), "/api");
        assert_eq!(normalize_base_path("/api/"), "/api");
    }

    #[test]
    fn test_sanitize_nested_message() {
        let body = br#"{"error":{"message":"bad key","type":"auth"}}"#;
        assert_eq!(sanitize_upstream_error(body), "bad key");
    }

    #[test]
    fn test_sanitize_flat_error_string() {
        assert_eq!(sanitize_upstream_error(br#"{"error":"quota"}"#), "quota");
    }

    #[test]
    fn test_sanitize_truncates_on_char_boundary() {
        let long = "错".repeat(MAX_UPSTREAM_ERROR_CHARS + 10);
        let sanitized = sanitize_upstream_error(long.as_bytes());
        assert!(sanitized.ends_with("..."));
        assert_eq!(sanitized.chars().count(), MAX_UPSTREAM_ERROR_CHARS + 3);
    }
}
