use crate::config::ConfigError;

/// Error type shared by the stream pumps and the relay.
///
/// Parsing problems (bad JSON, unknown payload shapes) never surface here;
/// they degrade to raw payloads inside the parser.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Consumer-initiated cancellation. Never routed through `on_error`.
    #[error("stream aborted")]
    Aborted,
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Upstream error: status={status}, message={message}")]
    Upstream { status: u16, message: String },
    #[error("Config error: {0}")]
    Config(String),
}

impl StreamError {
    #[must_use]
    pub fn is_abort(&self) -> bool {
        matches!(self, StreamError::Aborted)
    }

    /// The underlying message, without the variant's display prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            StreamError::Aborted => "stream aborted",
            StreamError::Transport(message)
            | StreamError::Upstream { message, .. }
            | StreamError::Config(message) => message,
        }
    }

    /// HTTP status the relay answers with when this error ends a request.
    #[must_use]
    pub fn http_status(&self) -> http::StatusCode {
        match self {
            StreamError::Upstream { status, .. } => http::StatusCode::from_u16(*status)
                .unwrap_or(http::StatusCode::BAD_GATEWAY),
            StreamError::Transport(_) => http::StatusCode::BAD_GATEWAY,
            // 499 is the de-facto "client closed request" code.
            StreamError::Aborted => {
                http::StatusCode::from_u16(499).unwrap_or(http::StatusCode::BAD_REQUEST)
            }
            StreamError::Config(_) => http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON error body in the flat `{ "error": { ... } }` shape.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "message": self.to_string(),
                "status": self.http_status().as_u16(),
            }
        })
    }
}

impl From<reqwest::Error> for StreamError {
    fn from(err: reqwest::Error) -> Self {
        StreamError::Transport(err.to_string())
    }
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        StreamError::Transport(err.to_string())
    }
}

impl From<std::convert::Infallible> for StreamError {
    fn from(err: std::convert::Infallible) -> Self {
        match err {}
    }
}

impl From<ConfigError> for StreamError {
    fn from(err: ConfigError) -> Self {
        StreamError::Config(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Axum integration
// ---------------------------------------------------------------------------

impl axum::response::IntoResponse for StreamError {
    fn into_response(self) -> axum::response::Response {
        (self.http_status(), axum::Json(self.to_json())).into_response()
    }
}
