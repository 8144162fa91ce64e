//! Gap operations
//!
//! Each operation follows the same shape: guard, per-gap advisory-lock
//! transaction, effects, commit, then domain-event emission. Events are
//! published strictly after commit so a subscriber that reads the
//! database on receipt sees the effect.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::auth::rbac;
use crate::database::gap_repository::{GapContentUpdate, GapRepository, NewGap};
use crate::database::{ExtensionRepository, HistoryRepository};
use crate::error::{AppError, AppResult};
use crate::events::DomainEvent;
use crate::gaps::state;
use crate::models::{
    Comment, ExtensionStatus, Gap, GapPoc, GapPriority, GapStatus, TatExtension, User, UserRole,
};
use crate::state::AppState;

// ============================================================================
// Inputs
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGapInput {
    pub title: String,
    pub description: String,
    #[serde(default = "default_priority")]
    pub priority: GapPriority,
    pub severity: Option<String>,
    pub department: Option<String>,
    pub form_template_id: Option<i64>,
    pub form_responses: Option<Value>,
    #[serde(default)]
    pub attachments: Option<Value>,
}

fn default_priority() -> GapPriority {
    GapPriority::Medium
}

/// Partial update; absent fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GapPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<GapPriority>,
    pub severity: Option<String>,
    pub department: Option<String>,
    pub form_responses: Option<Value>,
    pub attachments: Option<Value>,
    pub status: Option<GapStatus>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignInput {
    pub assignee_id: i64,
    pub deadline: Option<DateTime<Utc>>,
    pub note: Option<String>,
    pub priority: Option<GapPriority>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveInput {
    pub summary: String,
    #[serde(default)]
    pub attachments: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionInput {
    pub reason: String,
    pub proposed_deadline: DateTime<Utc>,
}

// ============================================================================
// Service
// ============================================================================

pub struct GapService {
    state: AppState,
}

impl GapService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    fn gaps(&self) -> GapRepository {
        self.state.gaps()
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Create a gap in `PendingAI` and enqueue enrichment. The HTTP
    /// response returns immediately; AI fields populate out-of-band.
    pub async fn create(&self, actor: &User, input: CreateGapInput) -> AppResult<Gap> {
        if input.title.trim().is_empty() || input.description.trim().is_empty() {
            return Err(AppError::invalid("title and description are required"));
        }

        // Pin the template version the form was captured against.
        let form_template_version = match input.form_template_id {
            Some(template_id) => {
                Some(self.state.form_templates().get(template_id).await?.version)
            }
            None => None,
        };

        let gap = self
            .gaps()
            .create(NewGap {
                title: input.title,
                description: input.description,
                priority: input.priority,
                severity: input.severity,
                department: input.department,
                reporter_id: actor.id,
                form_template_id: input.form_template_id,
                form_template_version,
                form_responses: input.form_responses,
                attachments: input.attachments.unwrap_or_else(|| Value::Array(vec![])),
            })
            .await?;

        tracing::info!(gap_id = %gap.gap_id, reporter = actor.id, "gap created");

        self.state.enricher.enqueue(gap.id);
        self.state.bus.publish(DomainEvent::GapCreated {
            gap_id: gap.id,
            actor_id: actor.id,
        });

        Ok(gap)
    }

    // ========================================================================
    // Content update
    // ========================================================================

    /// Merge permitted fields. A title or description change invalidates
    /// the similarity cache and re-enqueues enrichment; the newest enqueue
    /// supersedes any in-flight job for the gap.
    pub async fn update(&self, actor: &User, id: i64, patch: GapPatch) -> AppResult<Gap> {
        let gap = self.gaps().get(id).await?;
        rbac::ensure_can_read_gap(actor, &gap, &self.state.pocs()).await?;

        if gap.status == GapStatus::Closed && patch.status.is_none() {
            return Err(AppError::conflict("closed gaps cannot be edited"));
        }

        let new_title = patch.title.unwrap_or_else(|| gap.title.clone());
        let new_description = patch.description.unwrap_or_else(|| gap.description.clone());
        if new_title.trim().is_empty() || new_description.trim().is_empty() {
            return Err(AppError::invalid("title and description cannot be empty"));
        }

        let content_changed = new_title != gap.title || new_description != gap.description;

        // Status first: an illegal transition rejects the whole patch
        // before any content lands.
        if let Some(target) = patch.status {
            self.apply_status_change(actor, id, target).await?;
        }

        let updated = self
            .gaps()
            .update_content(
                id,
                GapContentUpdate {
                    title: new_title,
                    description: new_description,
                    priority: patch.priority.unwrap_or(gap.priority),
                    severity: patch.severity.or_else(|| gap.severity.clone()),
                    department: patch.department.or_else(|| gap.department.clone()),
                    form_responses: patch.form_responses.or_else(|| gap.form_responses.clone()),
                    attachments: patch.attachments.unwrap_or_else(|| gap.attachments.clone()),
                    updated_by_id: actor.id,
                },
            )
            .await?;

        if content_changed {
            self.state.similarity().invalidate_for_gap(id).await?;
            self.state.enricher.enqueue(id);
            tracing::debug!(gap = id, "content edit invalidated similarity cache");
        }

        self.state.bus.publish(DomainEvent::GapUpdated {
            gap_id: id,
            actor_id: Some(actor.id),
        });

        Ok(updated)
    }

    /// The generic update path only carries the two transitions the
    /// dedicated endpoints don't own: starting work and closing a
    /// resolved gap.
    async fn apply_status_change(
        &self,
        actor: &User,
        id: i64,
        target: GapStatus,
    ) -> AppResult<Gap> {
        let mut tx = self.gaps().begin_locked(id).await?;
        let current = GapRepository::get_in_tx(&mut tx, id).await?;

        state::ensure_transition(current.status, target)?;

        let updated = match target {
            GapStatus::InProgress => {
                GapRepository::set_in_progress(&mut tx, id, actor.id).await?
            }
            GapStatus::Closed => GapRepository::set_closed(&mut tx, id, actor.id, None).await?,
            other => {
                return Err(AppError::invalid(format!(
                    "status {other:?} must be reached through its dedicated operation"
                )))
            }
        };

        tx.commit().await?;
        Ok(updated)
    }

    // ========================================================================
    // Assignment
    // ========================================================================

    pub async fn assign(&self, actor: &User, id: i64, input: AssignInput) -> AppResult<Gap> {
        rbac::require_role(actor, &[UserRole::Admin, UserRole::Management])?;

        let assignee = self.state.users().get(input.assignee_id).await?;

        let mut tx = self.gaps().begin_locked(id).await?;
        let current = GapRepository::get_in_tx(&mut tx, id).await?;

        if !state::can_assign_from(current.status) {
            return Err(AppError::conflict(format!(
                "cannot assign a gap in state {:?}",
                current.status
            )));
        }

        let updated = GapRepository::set_assigned(
            &mut tx,
            id,
            assignee.id,
            actor.id,
            input.deadline,
            input.priority,
        )
        .await?;

        HistoryRepository::append_assignment(
            &mut tx,
            id,
            assignee.id,
            actor.id,
            input.note.as_deref(),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(gap = id, assignee = assignee.id, actor = actor.id, "gap assigned");

        self.state.bus.publish(DomainEvent::GapAssigned {
            gap_id: id,
            assignee_id: assignee.id,
            actor_id: actor.id,
        });

        Ok(updated)
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    pub async fn resolve(&self, actor: &User, id: i64, input: ResolveInput) -> AppResult<Gap> {
        rbac::require_role(
            actor,
            &[UserRole::Admin, UserRole::Management, UserRole::Poc],
        )?;

        if input.summary.trim().is_empty() {
            return Err(AppError::invalid("a resolution summary is required"));
        }

        let gap = self.gaps().get(id).await?;
        if actor.role == UserRole::Poc {
            let on_gap = gap.assigned_to_id == Some(actor.id)
                || self.state.pocs().is_member(id, actor.id).await?;
            if !on_gap {
                return Err(AppError::forbidden(
                    "POCs may only resolve gaps they are assigned to or rostered on",
                ));
            }
        }

        let mut tx = self.gaps().begin_locked(id).await?;
        let current = GapRepository::get_in_tx(&mut tx, id).await?;

        // The loser of a concurrent resolve re-reads `Resolved` here.
        if !state::can_resolve_from(current.status) {
            return Err(AppError::conflict(format!(
                "cannot resolve a gap in state {:?}",
                current.status
            )));
        }

        let attachments = input.attachments.unwrap_or_else(|| Value::Array(vec![]));
        let updated =
            GapRepository::set_resolved(&mut tx, id, actor.id, &input.summary, &attachments)
                .await?;

        // Open this cycle's history row; a later reopen stamps it.
        let resolved_at = updated.resolved_at.unwrap_or_else(Utc::now);
        HistoryRepository::open_cycle(
            &mut tx,
            id,
            &input.summary,
            Some(&attachments),
            actor.id,
            resolved_at,
        )
        .await?;

        tx.commit().await?;

        tracing::info!(gap = id, actor = actor.id, "gap resolved");

        self.state.bus.publish(DomainEvent::GapResolved {
            gap_id: id,
            actor_id: actor.id,
        });

        Ok(updated)
    }

    /// Reopen a resolved or closed gap. The open history row is stamped
    /// with the reopener before the live resolution fields clear; stamp
    /// and clear commit atomically under the gap lock.
    pub async fn reopen(&self, actor: &User, id: i64) -> AppResult<Gap> {
        let gap = self.gaps().get(id).await?;

        let allowed = gap.reporter_id == actor.id
            || gap.assigned_to_id == Some(actor.id)
            || matches!(
                actor.role,
                UserRole::QaOps | UserRole::Management | UserRole::Admin
            );
        if !allowed {
            return Err(AppError::forbidden(
                "only the reporter, the assignee, or QA/Management may reopen a gap",
            ));
        }

        let mut tx = self.gaps().begin_locked(id).await?;
        let current = GapRepository::get_in_tx(&mut tx, id).await?;

        if !state::can_reopen_from(current.status) {
            return Err(AppError::conflict(format!(
                "cannot reopen a gap in state {:?}",
                current.status
            )));
        }

        if current.resolution_summary.is_some() {
            HistoryRepository::stamp_reopen(&mut tx, id, actor.id).await?;
        }

        let updated = GapRepository::apply_reopen(&mut tx, id, actor.id).await?;
        tx.commit().await?;

        tracing::info!(gap = id, actor = actor.id, "gap reopened");

        self.state.bus.publish(DomainEvent::GapReopened {
            gap_id: id,
            actor_id: actor.id,
        });

        Ok(updated)
    }

    // ========================================================================
    // Duplicates
    // ========================================================================

    /// Close a gap as a duplicate of an earlier, canonical one. The
    /// original must not itself be a duplicate (no chains). Repeating the
    /// call with the same original is a no-op.
    pub async fn mark_duplicate(
        &self,
        actor: &User,
        id: i64,
        original_id: i64,
    ) -> AppResult<Gap> {
        rbac::require_role(actor, &[UserRole::Admin, UserRole::Management])?;

        if id == original_id {
            return Err(AppError::invalid("a gap cannot be a duplicate of itself"));
        }

        let original = self.gaps().get(original_id).await?;
        if original.duplicate_of_id.is_some() {
            return Err(AppError::invalid(
                "the original is itself closed as a duplicate; point at the canonical gap",
            ));
        }

        let mut tx = self.gaps().begin_locked(id).await?;
        let current = GapRepository::get_in_tx(&mut tx, id).await?;

        if current.status == GapStatus::Closed {
            return if current.duplicate_of_id == Some(original_id) {
                // Idempotent repeat of the same call.
                Ok(current)
            } else {
                Err(AppError::conflict("gap is already closed"))
            };
        }

        let updated = GapRepository::set_closed(&mut tx, id, actor.id, Some(original_id)).await?;
        tx.commit().await?;

        tracing::info!(gap = id, original = original_id, "gap closed as duplicate");

        self.state.bus.publish(DomainEvent::GapClosedDuplicate {
            gap_id: id,
            original_id,
            actor_id: actor.id,
        });

        Ok(updated)
    }

    // ========================================================================
    // TAT extensions
    // ========================================================================

    pub async fn request_extension(
        &self,
        actor: &User,
        gap_id: i64,
        input: ExtensionInput,
    ) -> AppResult<TatExtension> {
        if input.reason.trim().is_empty() {
            return Err(AppError::invalid("a reason is required"));
        }

        let gap = self.gaps().get(gap_id).await?;
        let on_gap = gap.assigned_to_id == Some(actor.id)
            || self.state.pocs().is_member(gap_id, actor.id).await?;
        if !on_gap {
            return Err(AppError::forbidden(
                "only the assignee or a POC on the gap may request an extension",
            ));
        }

        let extension = self
            .state
            .extensions()
            .create(gap_id, actor.id, &input.reason, input.proposed_deadline)
            .await?;

        self.state.bus.publish(DomainEvent::ExtensionRequested {
            extension_id: extension.id,
            gap_id,
            requester_id: actor.id,
        });

        Ok(extension)
    }

    /// Decide a pending extension. Approval moves the gap's deadline to
    /// the proposed value in the same transaction as the decision; a
    /// second decision on the same extension fails with `Conflict`.
    pub async fn review_extension(
        &self,
        actor: &User,
        extension_id: i64,
        decision: ExtensionStatus,
    ) -> AppResult<TatExtension> {
        rbac::require_role(actor, &[UserRole::Admin, UserRole::Management])?;

        if decision == ExtensionStatus::Pending {
            return Err(AppError::invalid("decision must be APPROVED or REJECTED"));
        }

        let extension = self.state.extensions().get(extension_id).await?;

        let mut tx = self.gaps().begin_locked(extension.gap_id).await?;
        let decided =
            ExtensionRepository::decide(&mut tx, extension_id, decision, actor.id).await?;

        if decision == ExtensionStatus::Approved {
            GapRepository::set_tat_deadline(&mut tx, decided.gap_id, decided.proposed_deadline)
                .await?;
        }

        tx.commit().await?;

        tracing::info!(
            extension = extension_id,
            gap = decided.gap_id,
            ?decision,
            "TAT extension reviewed"
        );

        if decision == ExtensionStatus::Approved {
            self.state.bus.publish(DomainEvent::GapUpdated {
                gap_id: decided.gap_id,
                actor_id: Some(actor.id),
            });
        }

        Ok(decided)
    }

    // ========================================================================
    // POC roster
    // ========================================================================

    async fn can_manage_roster(&self, actor: &User, gap_id: i64) -> AppResult<bool> {
        if actor.role.is_admin_or_management() {
            return Ok(true);
        }
        if actor.role == UserRole::Poc {
            return self.state.pocs().is_primary(gap_id, actor.id).await;
        }
        Ok(false)
    }

    /// Add a POC-role user to a gap's roster; optionally as primary,
    /// which atomically demotes any existing primary.
    pub async fn add_poc(
        &self,
        actor: &User,
        gap_id: i64,
        user_id: i64,
        is_primary: bool,
    ) -> AppResult<GapPoc> {
        if !self.can_manage_roster(actor, gap_id).await? {
            return Err(AppError::forbidden(
                "only Admin, Management, or the primary POC may manage the roster",
            ));
        }

        self.gaps().get(gap_id).await?;

        let target = self.state.users().get(user_id).await?;
        if target.role != UserRole::Poc {
            return Err(AppError::invalid(format!(
                "user {user_id} does not hold the POC role"
            )));
        }

        self.state
            .pocs()
            .add(gap_id, user_id, is_primary, actor.id)
            .await
    }

    pub async fn set_primary_poc(
        &self,
        actor: &User,
        gap_id: i64,
        user_id: i64,
    ) -> AppResult<GapPoc> {
        if !self.can_manage_roster(actor, gap_id).await? {
            return Err(AppError::forbidden(
                "only Admin, Management, or the primary POC may manage the roster",
            ));
        }
        self.state.pocs().set_primary(gap_id, user_id).await
    }

    /// A POC may remove themselves; removing anyone else takes Admin or
    /// Management.
    pub async fn remove_poc(&self, actor: &User, gap_id: i64, user_id: i64) -> AppResult<()> {
        let removing_self = actor.id == user_id;
        if !removing_self && !actor.role.is_admin_or_management() {
            return Err(AppError::forbidden(
                "only Admin or Management may remove another POC",
            ));
        }
        self.state.pocs().remove(gap_id, user_id).await
    }

    // ========================================================================
    // Comments
    // ========================================================================

    pub async fn add_comment(
        &self,
        actor: &User,
        gap_id: i64,
        body: &str,
        attachments: Option<Value>,
    ) -> AppResult<Comment> {
        if body.trim().is_empty() {
            return Err(AppError::invalid("comment body is required"));
        }

        let gap = self.gaps().get(gap_id).await?;
        rbac::ensure_can_read_gap(actor, &gap, &self.state.pocs()).await?;

        let comment = self
            .state
            .comments()
            .create(
                gap_id,
                actor.id,
                body,
                &attachments.unwrap_or_else(|| Value::Array(vec![])),
            )
            .await?;

        self.state.bus.publish(DomainEvent::CommentCreated {
            gap_id,
            comment_id: comment.id,
            author_id: actor.id,
        });

        Ok(comment)
    }
}
