//! Entity types persisted by the store
//!
//! Each struct maps one row of the relational schema (`sql/migrations/`).
//! Enumerated columns are VARCHAR-backed `sqlx::Type`s; JSON blob columns
//! (form schema and responses, attachment descriptors, SOP suggestions)
//! stay `serde_json::Value` at the schema boundary and are decoded only on
//! the paths that need their internals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

// ============================================================================
// Enumerations
// ============================================================================

/// Role of a user within the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Admin,
    Management,
    QaOps,
    Poc,
}

impl UserRole {
    /// Roles allowed to assign gaps, review extensions, and manage SOPs
    pub fn is_admin_or_management(self) -> bool {
        matches!(self, Self::Admin | Self::Management)
    }
}

/// Lifecycle state of a gap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GapStatus {
    PendingAi,
    NeedsReview,
    Assigned,
    InProgress,
    Resolved,
    Closed,
    Reopened,
}

impl GapStatus {
    /// Closed is the only terminal state
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }

    /// States that still count against the TAT deadline
    pub fn is_tat_active(self) -> bool {
        !matches!(self, Self::Resolved | Self::Closed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum GapPriority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum ExtensionStatus {
    Pending,
    Approved,
    Rejected,
}

// ============================================================================
// Users
// ============================================================================

/// Identity subject; `password_hash` never leaves the process
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub employee_id: Option<String>,
    pub display_name: String,
    pub role: UserRole,
    pub department: Option<String>,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Sanitized projection of a user, safe to serialize to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: i64,
    pub email: String,
    pub employee_id: Option<String>,
    pub display_name: String,
    pub role: UserRole,
    pub department: Option<String>,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            employee_id: user.employee_id.clone(),
            display_name: user.display_name.clone(),
            role: user.role,
            department: user.department.clone(),
        }
    }
}

// ============================================================================
// Gaps
// ============================================================================

/// The central record: one reported process defect
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Gap {
    pub id: i64,
    /// Human-readable id of form `GAP-NNNN`, monotonic
    pub gap_id: String,
    pub title: String,
    pub description: String,
    pub status: GapStatus,
    pub priority: GapPriority,
    pub severity: Option<String>,
    pub department: Option<String>,
    pub reporter_id: i64,
    pub assigned_to_id: Option<i64>,
    pub form_template_id: Option<i64>,
    pub form_template_version: Option<String>,
    pub form_responses: Option<Value>,
    pub tat_deadline: Option<DateTime<Utc>>,
    /// 0 = on-track, 1 = warned, 2 = breached; reset on deadline change
    #[serde(skip_serializing)]
    pub tat_alert_stage: i16,
    pub assigned_at: Option<DateTime<Utc>>,
    pub assigned_by_id: Option<i64>,
    pub in_progress_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by_id: Option<i64>,
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_by_id: Option<i64>,
    pub reopened_at: Option<DateTime<Utc>>,
    pub reopened_by_id: Option<i64>,
    pub ai_processed: bool,
    pub attachments: Value,
    pub sop_suggestions: Option<Value>,
    pub resolution_summary: Option<String>,
    pub resolution_attachments: Option<Value>,
    pub duplicate_of_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub updated_by_id: Option<i64>,
}

/// POC roster row; at most one `is_primary` per gap
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct GapPoc {
    pub id: i64,
    pub gap_id: i64,
    pub user_id: i64,
    pub is_primary: bool,
    pub added_by_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: i64,
    pub gap_id: i64,
    pub author_id: i64,
    pub body: String,
    pub attachments: Value,
    pub created_at: DateTime<Utc>,
}

/// One completed resolution cycle; appended before the live fields clear
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionHistoryEntry {
    pub id: i64,
    pub gap_id: i64,
    pub resolution_summary: String,
    pub resolution_attachments: Option<Value>,
    pub resolved_by_id: Option<i64>,
    pub resolved_at: DateTime<Utc>,
    pub reopened_by_id: Option<i64>,
    pub reopened_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: i64,
    pub gap_id: i64,
    pub assigned_to_id: i64,
    pub assigned_by_id: i64,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TatExtension {
    pub id: i64,
    pub gap_id: i64,
    pub requested_by_id: i64,
    pub reason: String,
    pub proposed_deadline: DateTime<Utc>,
    pub status: ExtensionStatus,
    pub reviewed_by_id: Option<i64>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Directed similarity edge; always written in symmetric pairs
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SimilarGap {
    pub id: i64,
    pub gap_id: i64,
    pub similar_gap_id: i64,
    pub score: i32,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// SOPs
// ============================================================================

/// Standard Operating Procedure document, optionally hierarchical
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Sop {
    pub id: i64,
    /// `SOP-NNN` for roots, `<parent>-#NN` for children
    pub sop_id: String,
    pub title: String,
    pub description: Option<String>,
    pub body: String,
    pub category: Option<String>,
    pub department: Option<String>,
    pub parent_sop_id: Option<i64>,
    pub version: String,
    pub is_active: bool,
    pub created_by_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Ranked suggestion the enricher caches on `gaps.sop_suggestions`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SopSuggestion {
    pub sop_id: i64,
    pub score: i32,
    pub reasoning: String,
}

// ============================================================================
// Audit and form templates
// ============================================================================

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: i64,
    pub actor_id: Option<i64>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub changes: Option<Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Named JSON schema blob; gaps pin the version they captured
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct FormTemplate {
    pub id: i64,
    pub name: String,
    pub version: String,
    pub schema: Value,
    pub created_by_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Attachments
// ============================================================================

/// Descriptor of one stored upload, echoed to the client on upload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentDescriptor {
    pub original_name: String,
    pub filename: String,
    pub size: u64,
    pub mimetype: String,
    pub path: String,
}

impl AttachmentDescriptor {
    /// Decode a JSONB attachment list, tolerating absent or malformed blobs.
    /// Entries that fail to decode are skipped rather than failing the read.
    pub fn list_from_value(value: Option<&Value>) -> Vec<AttachmentDescriptor> {
        let Some(Value::Array(items)) = value else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| serde_json::from_value(item.clone()).ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_terminality() {
        assert!(GapStatus::Closed.is_terminal());
        assert!(!GapStatus::Resolved.is_terminal());
        assert!(!GapStatus::Reopened.is_terminal());
    }

    #[test]
    fn test_tat_active_states() {
        assert!(GapStatus::Assigned.is_tat_active());
        assert!(GapStatus::InProgress.is_tat_active());
        assert!(!GapStatus::Resolved.is_tat_active());
        assert!(!GapStatus::Closed.is_tat_active());
    }

    #[test]
    fn test_role_wire_format() {
        assert_eq!(
            serde_json::to_string(&UserRole::QaOps).unwrap(),
            "\"QA_OPS\""
        );
        assert_eq!(serde_json::to_string(&UserRole::Poc).unwrap(), "\"POC\"");
        assert_eq!(
            serde_json::to_string(&GapStatus::PendingAi).unwrap(),
            "\"PENDING_AI\""
        );
        assert_eq!(
            serde_json::to_string(&GapStatus::NeedsReview).unwrap(),
            "\"NEEDS_REVIEW\""
        );
    }

    #[test]
    fn test_attachment_list_decoding() {
        let blob = json!([
            {
                "originalName": "a.pdf",
                "filename": "1700000000-a1b2.pdf",
                "size": 1024,
                "mimetype": "application/pdf",
                "path": "/api/files/1700000000-a1b2.pdf"
            },
            { "unexpected": true }
        ]);
        let list = AttachmentDescriptor::list_from_value(Some(&blob));
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].original_name, "a.pdf");

        assert!(AttachmentDescriptor::list_from_value(None).is_empty());
        assert!(AttachmentDescriptor::list_from_value(Some(&json!("nope"))).is_empty());
    }
}
