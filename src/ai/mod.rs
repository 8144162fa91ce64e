//! AI integration
//!
//! The core consumes two opaque provider functions: a pairwise gap
//! similarity score and an SOP ranking. Everything else — queueing,
//! fan-out, thresholding, write-back — lives in the enricher and knows
//! nothing about the provider wire format.

pub mod enricher;
pub mod openai;

use async_trait::async_trait;

use crate::models::{Gap, Sop, SopSuggestion};

/// Errors that can occur during AI operations
#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("authentication error: missing or invalid API key")]
    AuthenticationError,

    #[error("rate limit exceeded")]
    RateLimitError,

    #[error("invalid response format: {0}")]
    InvalidResponse(String),
}

/// Result type for AI operations
pub type AiResult<T> = Result<T, AiError>;

/// Provider contract consumed by the enricher.
///
/// Implementations must be cheap to share across concurrent comparisons.
#[async_trait]
pub trait SimilarityProvider: Send + Sync {
    /// Semantic similarity of two gaps, 0..=100.
    async fn score(&self, gap: &Gap, other: &Gap) -> AiResult<i32>;

    /// Rank the given SOPs by applicability to the gap, best first.
    async fn rank_sops(&self, gap: &Gap, sops: &[Sop]) -> AiResult<Vec<SopSuggestion>>;
}

/// Clamp a raw provider score into 0..=100; anything out of range is
/// treated as 0 rather than trusted.
pub fn clamp_score(raw: i64) -> i32 {
    if (0..=100).contains(&raw) {
        raw as i32
    } else {
        0
    }
}

/// Utility functions shared by provider implementations
pub mod utils {
    use super::*;

    /// Extract the first JSON object embedded in a model response,
    /// tolerating markdown code fences and prose around it.
    pub fn parse_structured_response(response: &str) -> AiResult<serde_json::Value> {
        let cleaned = response.trim();
        let cleaned = if cleaned.starts_with("```") {
            match cleaned.find('\n') {
                Some(start) => {
                    let content = &cleaned[start + 1..];
                    match content.rfind("```") {
                        Some(end) => &content[..end],
                        None => content,
                    }
                }
                None => cleaned,
            }
        } else {
            cleaned
        };

        if let (Some(start), Some(end)) = (cleaned.find('{'), cleaned.rfind('}')) {
            serde_json::from_str(&cleaned[start..=end]).map_err(AiError::JsonError)
        } else {
            Err(AiError::InvalidResponse(
                "no JSON object in response".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_in_range() {
        assert_eq!(clamp_score(0), 0);
        assert_eq!(clamp_score(60), 60);
        assert_eq!(clamp_score(100), 100);
    }

    #[test]
    fn test_clamp_out_of_range_is_zero() {
        assert_eq!(clamp_score(-5), 0);
        assert_eq!(clamp_score(101), 0);
        assert_eq!(clamp_score(1000), 0);
    }

    #[test]
    fn test_parse_plain_json() {
        let value = utils::parse_structured_response(r#"{"score": 85}"#).unwrap();
        assert_eq!(value["score"], 85);
    }

    #[test]
    fn test_parse_fenced_json() {
        let raw = "```json\n{\"score\": 42}\n```";
        let value = utils::parse_structured_response(raw).unwrap();
        assert_eq!(value["score"], 42);
    }

    #[test]
    fn test_parse_json_with_surrounding_prose() {
        let raw = "Here is the result: {\"score\": 7} hope that helps";
        let value = utils::parse_structured_response(raw).unwrap();
        assert_eq!(value["score"], 7);
    }

    #[test]
    fn test_parse_without_json_fails() {
        assert!(utils::parse_structured_response("no json here").is_err());
    }
}
