//! Event fan-out
//!
//! Consumes the domain-event bus and maps each event onto up to three
//! side effects: email through the relay, a room broadcast on the
//! realtime hub, and an audit row. The channels are failure-isolated —
//! an SMTP error never blocks the socket push, and an audit problem is
//! logged by the repository and forgotten.

pub mod email;

pub use email::Mailer;

use serde_json::json;
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::database::audit_repository::AuditRecord;
use crate::database::{AuditRepository, GapRepository, PocRepository, UserRepository};
use crate::error::AppResult;
use crate::events::{DomainEvent, EventBus, TatAlertKind};
use crate::models::Gap;
use crate::realtime::{gap_room, user_room, RealtimeHub, ServerMessage};

pub struct Notifier {
    pool: PgPool,
    mailer: Mailer,
    hub: RealtimeHub,
    audit: AuditRepository,
}

/// Subscribe to the bus and fan events out until the bus closes.
pub fn spawn(
    pool: PgPool,
    mailer: Mailer,
    hub: RealtimeHub,
    bus: &EventBus,
) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    let notifier = Notifier {
        audit: AuditRepository::new(pool.clone()),
        pool,
        mailer,
        hub,
    };

    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Err(err) = notifier.dispatch(&event).await {
                        warn!(gap = event.gap_id(), error = %err, "notification fan-out failed");
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "notifier lagged behind the event bus");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
        info!("notifier stopped");
    })
}

impl Notifier {
    fn gaps(&self) -> GapRepository {
        GapRepository::new(self.pool.clone())
    }

    fn users(&self) -> UserRepository {
        UserRepository::new(self.pool.clone())
    }

    fn pocs(&self) -> PocRepository {
        PocRepository::new(self.pool.clone())
    }

    async fn dispatch(&self, event: &DomainEvent) -> AppResult<()> {
        match event {
            DomainEvent::GapCreated { gap_id, actor_id } => {
                self.audit_event(Some(*actor_id), "CREATE_GAP", *gap_id).await;
            }

            DomainEvent::GapUpdated { gap_id, .. } => {
                self.push_gap_updated(*gap_id).await;
            }

            DomainEvent::GapAssigned {
                gap_id,
                assignee_id,
                actor_id,
            } => {
                let gap = self.gaps().get(*gap_id).await?;
                self.email_assignment(&gap, *assignee_id).await;
                self.push_gap_updated(*gap_id).await;
                self.audit_event(Some(*actor_id), "ASSIGN_GAP", *gap_id).await;
            }

            DomainEvent::GapResolved { gap_id, actor_id } => {
                let gap = self.gaps().get(*gap_id).await?;
                self.email_resolution(&gap).await;
                self.push_gap_updated(*gap_id).await;
                self.audit_event(Some(*actor_id), "UPDATE_GAP_STATUS", *gap_id)
                    .await;
            }

            DomainEvent::GapReopened { gap_id, actor_id } => {
                self.push_gap_updated(*gap_id).await;
                self.audit_event(Some(*actor_id), "gap_reopened", *gap_id).await;
            }

            DomainEvent::GapClosedDuplicate {
                gap_id,
                original_id,
                actor_id,
            } => {
                let gap = self.gaps().get(*gap_id).await?;
                self.email_duplicate_closure(&gap, *original_id).await;
                self.push_gap_updated(*gap_id).await;
                self.audit_event(Some(*actor_id), "gap_marked_duplicate", *gap_id)
                    .await;
            }

            DomainEvent::ExtensionRequested {
                extension_id,
                gap_id,
                requester_id,
            } => {
                let gap = self.gaps().get(*gap_id).await?;
                self.email_extension_request(&gap).await;
                self.audit
                    .record(AuditRecord {
                        actor_id: Some(*requester_id),
                        action: "CREATE_TAT_EXTENSION".to_string(),
                        entity_type: "tat_extensions".to_string(),
                        entity_id: extension_id.to_string(),
                        changes: None,
                        ip_address: None,
                        user_agent: None,
                    })
                    .await;
            }

            DomainEvent::TatAlert { gap_id, kind } => {
                let gap = self.gaps().get(*gap_id).await?;
                self.email_tat_alert(&gap, *kind).await;
            }

            DomainEvent::CommentCreated {
                gap_id,
                comment_id,
                author_id,
            } => {
                self.push_comment(*gap_id, *comment_id, *author_id).await?;
            }
        }
        Ok(())
    }

    // ========================================================================
    // Socket pushes
    // ========================================================================

    async fn push_gap_updated(&self, gap_id: i64) {
        self.hub.broadcast(
            &gap_room(gap_id),
            ServerMessage::new("gap:updated", json!({ "gapId": gap_id })),
        );
    }

    /// `new-comment` to the gap room plus a per-POC nudge in their user
    /// rooms, skipping the author.
    async fn push_comment(&self, gap_id: i64, comment_id: i64, author_id: i64) -> AppResult<()> {
        let payload = json!({
            "gapId": gap_id,
            "commentId": comment_id,
            "authorId": author_id,
        });

        self.hub.broadcast(
            &gap_room(gap_id),
            ServerMessage::new("new-comment", payload.clone()),
        );

        for poc in self.pocs().list_for_gap(gap_id).await? {
            if poc.user_id == author_id {
                continue;
            }
            self.hub.broadcast(
                &user_room(poc.user_id),
                ServerMessage::new("poc-comment-notification", payload.clone()),
            );
        }
        Ok(())
    }

    // ========================================================================
    // Email composition
    // ========================================================================

    /// Assignee in To, the gap's other POCs in Cc.
    async fn email_assignment(&self, gap: &Gap, assignee_id: i64) {
        let Some(to) = self.email_of(assignee_id).await else {
            return;
        };

        let cc = self.poc_emails_except(gap.id, &[assignee_id]).await;
        let subject = format!("[{}] Gap assigned to you: {}", gap.gap_id, gap.title);
        let body = format!(
            "You have been assigned gap {}.\n\nTitle: {}\n\n{}\n\nDeadline: {}",
            gap.gap_id,
            gap.title,
            gap.description,
            gap.tat_deadline
                .map(|d| d.to_rfc3339())
                .unwrap_or_else(|| "not set".to_string()),
        );

        self.mailer.send(&[to], &cc, &subject, body).await;
    }

    /// Reporter in To, POCs in Cc.
    async fn email_resolution(&self, gap: &Gap) {
        let Some(to) = self.email_of(gap.reporter_id).await else {
            return;
        };

        let cc = self.poc_emails_except(gap.id, &[gap.reporter_id]).await;
        let subject = format!("[{}] Gap resolved: {}", gap.gap_id, gap.title);
        let body = format!(
            "Gap {} has been resolved.\n\nResolution: {}",
            gap.gap_id,
            gap.resolution_summary.as_deref().unwrap_or("(no summary)"),
        );

        self.mailer.send(&[to], &cc, &subject, body).await;
    }

    async fn email_duplicate_closure(&self, gap: &Gap, original_id: i64) {
        let Some(to) = self.email_of(gap.reporter_id).await else {
            return;
        };

        let original_label = match self.gaps().find(original_id).await {
            Ok(Some(original)) => original.gap_id,
            _ => format!("gap {original_id}"),
        };

        let subject = format!("[{}] Gap closed as duplicate", gap.gap_id);
        let body = format!(
            "Gap {} was closed as a duplicate of {}. Follow the original for updates.",
            gap.gap_id, original_label,
        );

        self.mailer.send(&[to], &[], &subject, body).await;
    }

    /// All Admin and Management users get the request.
    async fn email_extension_request(&self, gap: &Gap) {
        let reviewers = match self.users().list_admins_and_management().await {
            Ok(users) => users,
            Err(err) => {
                warn!(error = %err, "failed to load extension reviewers");
                return;
            }
        };

        let to: Vec<String> = reviewers.into_iter().map(|u| u.email).collect();
        if to.is_empty() {
            return;
        }

        let subject = format!("[{}] TAT extension requested", gap.gap_id);
        let body = format!(
            "A deadline extension was requested for gap {} ({}). Review it in the console.",
            gap.gap_id, gap.title,
        );

        self.mailer.send(&to, &[], &subject, body).await;
    }

    async fn email_tat_alert(&self, gap: &Gap, kind: TatAlertKind) {
        let Some(assignee_id) = gap.assigned_to_id else {
            debug!(gap = gap.id, "TAT alert on unassigned gap; no email target");
            return;
        };
        let Some(to) = self.email_of(assignee_id).await else {
            return;
        };

        let (subject, phrasing) = match kind {
            TatAlertKind::Approaching => (
                format!("[{}] TAT deadline approaching", gap.gap_id),
                "is approaching its turnaround deadline",
            ),
            TatAlertKind::Breached => (
                format!("[{}] TAT deadline breached", gap.gap_id),
                "has breached its turnaround deadline",
            ),
        };

        let body = format!(
            "Gap {} ({}) {}.\n\nDeadline: {}",
            gap.gap_id,
            gap.title,
            phrasing,
            gap.tat_deadline
                .map(|d| d.to_rfc3339())
                .unwrap_or_else(|| "not set".to_string()),
        );

        self.mailer.send(&[to], &[], &subject, body).await;
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn email_of(&self, user_id: i64) -> Option<String> {
        match self.users().find_by_id(user_id).await {
            Ok(Some(user)) => Some(user.email),
            Ok(None) => {
                debug!(user = user_id, "email target no longer exists");
                None
            }
            Err(err) => {
                warn!(user = user_id, error = %err, "failed to resolve email target");
                None
            }
        }
    }

    async fn poc_emails_except(&self, gap_id: i64, excluded: &[i64]) -> Vec<String> {
        let roster = match self.pocs().list_for_gap(gap_id).await {
            Ok(roster) => roster,
            Err(err) => {
                warn!(gap = gap_id, error = %err, "failed to load POC roster for Cc");
                return Vec::new();
            }
        };

        let ids: Vec<i64> = roster
            .iter()
            .map(|p| p.user_id)
            .filter(|id| !excluded.contains(id))
            .collect();

        match self.users().get_many(&ids).await {
            Ok(users) => users.into_iter().map(|u| u.email).collect(),
            Err(err) => {
                warn!(gap = gap_id, error = %err, "failed to resolve Cc users");
                Vec::new()
            }
        }
    }

    async fn audit_event(&self, actor_id: Option<i64>, action: &str, gap_id: i64) {
        self.audit
            .record(AuditRecord {
                actor_id,
                action: action.to_string(),
                entity_type: "gaps".to_string(),
                entity_id: gap_id.to_string(),
                changes: None,
                ip_address: None,
                user_agent: None,
            })
            .await;
    }
}
