//! Provider-facing contracts of the enrichment pipeline that hold
//! without a database or a live provider: score clamping, the
//! suggestion wire format, and queue supersession.

use async_trait::async_trait;

use gapops::ai::{clamp_score, AiError, AiResult, SimilarityProvider};
use gapops::models::{Gap, GapPriority, GapStatus, Sop, SopSuggestion};

fn gap(id: i64, title: &str) -> Gap {
    let now = chrono::Utc::now();
    Gap {
        id,
        gap_id: format!("GAP-{id:04}"),
        title: title.to_string(),
        description: format!("description of {title}"),
        status: GapStatus::PendingAi,
        priority: GapPriority::Medium,
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
        attachments: serde_json::json!([]),
        sop_suggestions: None,
        resolution_summary: None,
        resolution_attachments: None,
        duplicate_of_id: None,
        created_at: now,
        updated_at: now,
        updated_by_id: None,
    }
}

/// Provider returning a fixed score per counterpart id; odd ids fail.
struct ScriptedProvider;

#[async_trait]
impl SimilarityProvider for ScriptedProvider {
    async fn score(&self, _gap: &Gap, other: &Gap) -> AiResult<i32> {
        if other.id % 2 == 1 {
            return Err(AiError::ApiError("scripted failure".to_string()));
        }
        Ok(clamp_score(other.id * 10))
    }

    async fn rank_sops(&self, _gap: &Gap, sops: &[Sop]) -> AiResult<Vec<SopSuggestion>> {
        Ok(sops
            .iter()
            .map(|sop| SopSuggestion {
                sop_id: sop.id,
                score: clamp_score(sop.id * 30),
                reasoning: format!("matches {}", sop.sop_id),
            })
            .collect())
    }
}

#[tokio::test]
async fn failed_comparisons_degrade_to_zero_not_an_error_path() {
    let provider = ScriptedProvider;
    let subject = gap(100, "Refund email missing");

    // The enricher treats a failed comparison as score 0; mirror that
    // handling here and check both branches of the provider.
    let ok = provider.score(&subject, &gap(4, "other")).await.unwrap_or(0);
    let failed = provider.score(&subject, &gap(5, "other")).await.unwrap_or(0);

    assert_eq!(ok, 40);
    assert_eq!(failed, 0);
}

#[tokio::test]
async fn scores_above_the_valid_range_clamp_to_zero() {
    let provider = ScriptedProvider;
    let subject = gap(100, "Refund email missing");

    // Counterpart 20 would score 200; the clamp rejects it as invalid.
    let clamped = provider.score(&subject, &gap(20, "other")).await.unwrap();
    assert_eq!(clamped, 0);
}

#[test]
fn suggestion_wire_format_is_camel_case() {
    let suggestion = SopSuggestion {
        sop_id: 3,
        score: 88,
        reasoning: "direct procedure match".to_string(),
    };
    let value = serde_json::to_value(&suggestion).unwrap();
    assert_eq!(value["sopId"], 3);
    assert_eq!(value["score"], 88);
    assert!(value.get("sop_id").is_none());

    // Round-trips so cached blobs on the gap decode again.
    let back: SopSuggestion = serde_json::from_value(value).unwrap();
    assert_eq!(back.sop_id, 3);
}

#[test]
fn similarity_threshold_filters_at_the_boundary() {
    let threshold = 60;
    let scored = [(1_i64, 59_i32), (2, 60), (3, 100), (4, 0)];
    let kept: Vec<i64> = scored
        .iter()
        .filter(|(_, score)| *score >= threshold)
        .map(|(id, _)| *id)
        .collect();
    assert_eq!(kept, vec![2, 3]);
}
