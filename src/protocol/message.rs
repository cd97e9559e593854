use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Token accounting reported by the upstream.
///
/// The three standard counters are typed; anything else the provider sends
/// alongside them (`prompt_tokens_details`, cache counters, ...) is kept
/// verbatim in `extra`. Counters are read leniently: `null` or a value that
/// is not a count reads as 0, whole floats and numeric strings are accepted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default, deserialize_with = "lenient_count")]
    pub prompt_tokens: u64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub completion_tokens: u64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub total_tokens: u64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn lenient_count<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(count_from_value(&value))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn count_from_value(value: &Value) -> u64 {
    match value {
        Value::Number(n) => n.as_u64().unwrap_or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0 && f.fract() == 0.0)
                .map_or(0, |f| f as u64)
        }),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Canonical unit produced by the parser for one SSE record.
///
/// Every field is optional. A message with no field set is never handed to
/// callers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SseMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished: Option<bool>,
}

impl SseMessage {
    /// The end-of-stream marker produced by a `[DONE]` record.
    #[must_use]
    pub fn done() -> Self {
        Self {
            finished: Some(true),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    /// True when no field is populated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.event.is_none()
            && self.payload.is_none()
            && self.content.is_none()
            && self.reasoning.is_none()
            && self.error.is_none()
            && self.usage.is_none()
            && self.finished.is_none()
    }

    /// Non-empty content delta, if any.
    #[inline]
    #[must_use]
    pub fn content_delta(&self) -> Option<&str> {
        self.content.as_deref().filter(|s| !s.is_empty())
    }

    #[inline]
    #[must_use]
    pub fn reasoning_delta(&self) -> Option<&str> {
        self.reasoning.as_deref().filter(|s| !s.is_empty())
    }

    #[inline]
    #[must_use]
    pub fn error_text(&self) -> Option<&str> {
        self.error.as_deref().filter(|s| !s.is_empty())
    }

    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished == Some(true)
    }
}
