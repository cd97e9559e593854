use crate::protocol::TokenUsage;
use crate::stream::StreamCompletion;
use std::time::Duration;
use tracing::info;

/// Estimate the number of tokens in `text`.
///
/// Uses a lightweight heuristic (`bytes / 4`) to avoid loading model BPE tables.
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}

/// Merge upstream-reported usage with a local estimate of the completion.
///
/// - Always prefer upstream non-zero values
/// - Only fill missing or zero counters with estimates
/// - Compute total = prompt + completion if total is missing
#[must_use]
pub fn merge_usage(upstream: Option<&TokenUsage>, estimated_completion: u64) -> TokenUsage {
    let mut merged = upstream.cloned().unwrap_or_default();
    if merged.completion_tokens == 0 {
        merged.completion_tokens = estimated_completion;
    }
    if merged.total_tokens == 0 {
        merged.total_tokens = merged
            .prompt_tokens
            .saturating_add(merged.completion_tokens);
    }
    merged
}

/// Log the outcome of a proxied stream at INFO level.
pub fn log_stream_usage(completion: &StreamCompletion, duration: Duration) {
    let estimated = estimate_tokens(&completion.content)
        + completion.reasoning.as_deref().map_or(0, estimate_tokens);
    let usage = merge_usage(completion.usage.as_ref(), estimated);
    info!(
        content_bytes = completion.content.len(),
        reasoning_bytes = completion.reasoning.as_deref().map_or(0, str::len),
        prompt_tokens = usage.prompt_tokens,
        completion_tokens = usage.completion_tokens,
        total_tokens = usage.total_tokens,
        usage_reported = completion.usage.is_some(),
        duration_seconds = duration.as_secs_f64(),
        "stream completed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens_nonempty() {
        assert!(estimate_tokens("Hello, world!") > 0);
    }

    #[test]
    fn test_estimate_tokens_empty() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn test_merge_usage_prefers_upstream() {
        let upstream = TokenUsage {
            prompt_tokens: 100,
            completion_tokens: 50,
            total_tokens: 150,
            ..TokenUsage::default()
        };
        let merged = merge_usage(Some(&upstream), 999);
        assert_eq!(merged, upstream);
    }

    #[test]
    fn test_merge_usage_fills_missing() {
        let merged = merge_usage(None, 20);
        assert_eq!(merged.prompt_tokens, 0);
        assert_eq!(merged.completion_tokens, 20);
        assert_eq!(merged.total_tokens, 20);
    }

    #[test]
    fn test_merge_usage_saturates_on_huge_counters() {
        let upstream = TokenUsage {
            prompt_tokens: u64::MAX,
            completion_tokens: 10,
            ..TokenUsage::default()
        };
        let merged = merge_usage(Some(&upstream), 0);
        assert_eq!(merged.total_tokens, u64::MAX);
    }

    #[test]
    fn test_merge_usage_partial_upstream() {
        let upstream = TokenUsage {
            prompt_tokens: 100,
            ..TokenUsage::default()
        };
        let merged = merge_usage(Some(&upstream), 25);
        assert_eq!(merged.completion_tokens, 25);
        assert_eq!(merged.total_tokens, 125);
    }
}
