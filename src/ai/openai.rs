//! OpenAI-compatible chat-completions provider
//!
//! Implements `SimilarityProvider` over the chat-completions API with a
//! JSON response format. Every request carries the configured per-call
//! timeout; out-of-range or unparseable scores clamp to 0.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

use super::{clamp_score, utils, AiError, AiResult, SimilarityProvider};
use crate::config::AiSettings;
use crate::models::{Gap, Sop, SopSuggestion};

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

impl OpenAiClient {
    pub fn new(settings: &AiSettings) -> AiResult<Self> {
        let api_key = settings
            .api_key
            .clone()
            .ok_or(AiError::AuthenticationError)?;

        let client = Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(AiError::HttpError)?;

        Ok(Self {
            client,
            api_key,
            model: settings.model.clone(),
            base_url: "https://api.openai.com/v1".to_string(),
        })
    }

    #[cfg(test)]
    fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn chat(&self, system: String, user: String) -> AiResult<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system,
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user,
                },
            ],
            temperature: 0.1,
            response_format: ResponseFormat {
                format_type: "json_object".to_string(),
            },
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(AiError::HttpError)?;

        let status = response.status();
        let body = response.text().await.map_err(AiError::HttpError)?;

        if !status.is_success() {
            error!("AI provider error: {} - {}", status, body);

            if let Ok(parsed) = serde_json::from_str::<ApiErrorResponse>(&body) {
                return match parsed.error.error_type.as_str() {
                    "insufficient_quota" | "rate_limit_exceeded" => Err(AiError::RateLimitError),
                    "invalid_api_key" | "invalid_organization" => {
                        Err(AiError::AuthenticationError)
                    }
                    _ => Err(AiError::ApiError(parsed.error.message)),
                };
            }
            return Err(AiError::ApiError(format!("HTTP {status} - {body}")));
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| AiError::InvalidResponse(format!("failed to parse response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AiError::InvalidResponse("no choices in response".to_string()))
    }

    fn similarity_prompts(gap: &Gap, other: &Gap) -> (String, String) {
        let system = "You compare reports of operational process defects. \
            Judge how likely the two reports describe the same underlying defect, \
            considering title and description semantics rather than wording. \
            Respond ONLY with valid JSON: {\"score\": <integer 0-100>}"
            .to_string();

        let user = format!(
            "REPORT A\nTitle: {}\nDescription: {}\n\nREPORT B\nTitle: {}\nDescription: {}",
            gap.title, gap.description, other.title, other.description
        );

        (system, user)
    }

    fn ranking_prompts(gap: &Gap, sops: &[Sop]) -> (String, String) {
        let system = "You match an operational process defect against a catalogue of \
            Standard Operating Procedures. Rank procedures by how directly they help \
            resolve the defect. Respond ONLY with valid JSON: \
            {\"suggestions\": [{\"sopId\": <id>, \"score\": <integer 0-100>, \
            \"reasoning\": \"<one sentence>\"}]} listing only relevant procedures, \
            best first."
            .to_string();

        let mut catalogue = String::new();
        for sop in sops {
            catalogue.push_str(&format!(
                "- id {} ({}): {} — {}\n",
                sop.id,
                sop.sop_id,
                sop.title,
                sop.description.as_deref().unwrap_or("")
            ));
        }

        let user = format!(
            "DEFECT\nTitle: {}\nDescription: {}\n\nPROCEDURES\n{}",
            gap.title, gap.description, catalogue
        );

        (system, user)
    }
}

#[async_trait]
impl SimilarityProvider for OpenAiClient {
    async fn score(&self, gap: &Gap, other: &Gap) -> AiResult<i32> {
        let (system, user) = Self::similarity_prompts(gap, other);
        let content = self.chat(system, user).await?;

        debug!(gap = gap.id, other = other.id, "similarity response received");

        let parsed = utils::parse_structured_response(&content)?;
        let raw = parsed["score"]
            .as_i64()
            .ok_or_else(|| AiError::InvalidResponse("score is not an integer".to_string()))?;

        Ok(clamp_score(raw))
    }

    async fn rank_sops(&self, gap: &Gap, sops: &[Sop]) -> AiResult<Vec<SopSuggestion>> {
        if sops.is_empty() {
            return Ok(Vec::new());
        }

        let (system, user) = Self::ranking_prompts(gap, sops);
        let content = self.chat(system, user).await?;
        let parsed = utils::parse_structured_response(&content)?;

        let Some(items) = parsed["suggestions"].as_array() else {
            return Err(AiError::InvalidResponse(
                "suggestions is not an array".to_string(),
            ));
        };

        let known_ids: Vec<i64> = sops.iter().map(|s| s.id).collect();

        let suggestions = items
            .iter()
            .filter_map(|item| {
                let sop_id = item["sopId"].as_i64()?;
                // Drop hallucinated ids the catalogue never contained.
                if !known_ids.contains(&sop_id) {
                    return None;
                }
                Some(SopSuggestion {
                    sop_id,
                    score: clamp_score(item["score"].as_i64().unwrap_or(0)),
                    reasoning: item["reasoning"].as_str().unwrap_or("").to_string(),
                })
            })
            .collect();

        Ok(suggestions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> AiSettings {
        AiSettings {
            api_key: Some("test-key".to_string()),
            model: "gpt-4o-mini".to_string(),
            similarity_threshold: 60,
            sop_top_k: 5,
            concurrency: 4,
            request_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_client_requires_api_key() {
        let mut s = settings();
        s.api_key = None;
        assert!(matches!(
            OpenAiClient::new(&s),
            Err(AiError::AuthenticationError)
        ));
    }

    #[test]
    fn test_client_construction() {
        let client = OpenAiClient::new(&settings()).unwrap();
        assert_eq!(client.model, "gpt-4o-mini");
        let client = client.with_base_url("http://localhost:9999");
        assert_eq!(client.base_url, "http://localhost:9999");
    }

    #[test]
    fn test_similarity_prompt_carries_both_reports() {
        let gap = test_gap(1, "Refund email missing", "Customers get no refund email");
        let other = test_gap(2, "Refund confirmation not sent", "No confirmation after refund");
        let (_, user) = OpenAiClient::similarity_prompts(&gap, &other);
        assert!(user.contains("Refund email missing"));
        assert!(user.contains("Refund confirmation not sent"));
    }

    fn test_gap(id: i64, title: &str, description: &str) -> Gap {
        use chrono::Utc;
        use serde_json::json;
        let now = Utc::now();
        Gap {
            id,
            gap_id: format!("GAP-{id:04}"),
            title: title.to_string(),
            description: description.to_string(),
            status: crate::models::GapStatus::PendingAi,
            priority: crate::models::GapPriority::Medium,
            severity: None,
            department: None,
            reporter_id: 1,
            assigned_to_id: None,
            form_template_id: None,
            form_template_version: None,
            form_responses: None,
            tat_deadline: None,
            tat_alert_stage: 0,
            assigned_at: None,
            assigned_by_id: None,
            in_progress_at: None,
            resolved_at: None,
            resolved_by_id: None,
            closed_at: None,
            closed_by_id: None,
            reopened_at: None,
            reopened_by_id: None,
            ai_processed: false,
            attachments: json!([]),
            sop_suggestions: None,
            resolution_summary: None,
            resolution_attachments: None,
            duplicate_of_id: None,
            created_at: now,
            updated_at: now,
            updated_by_id: None,
        }
    }
}
