//! Role and ownership predicates
//!
//! Read scope over gaps:
//! - Admin, Management — every gap
//! - QA/Ops — gaps they reported
//! - POC — gaps where they are primary assignee or on the roster
//!
//! Every gap-scoped endpoint (read, comment, attachment download,
//! timeline, socket join) funnels through `ensure_can_read_gap`, so the
//! predicate cannot drift between surfaces.

use crate::database::gap_repository::GapReadScope;
use crate::database::PocRepository;
use crate::error::{AppError, AppResult};
use crate::models::{Gap, User, UserRole};

/// Reject with `Forbidden` unless the user holds one of the roles.
pub fn require_role(user: &User, roles: &[UserRole]) -> AppResult<()> {
    if roles.contains(&user.role) {
        Ok(())
    } else {
        Err(AppError::forbidden(format!(
            "role {:?} may not perform this operation",
            user.role
        )))
    }
}

/// The list scope a role resolves to.
pub fn read_scope(user: &User) -> GapReadScope {
    match user.role {
        UserRole::Admin | UserRole::Management => GapReadScope::All,
        UserRole::QaOps => GapReadScope::Reporter(user.id),
        UserRole::Poc => GapReadScope::Poc(user.id),
    }
}

/// Pure form of the per-gap read predicate. `is_rostered` is the POC
/// roster membership, looked up by the caller.
pub fn can_read_gap(user: &User, gap: &Gap, is_rostered: bool) -> bool {
    match user.role {
        UserRole::Admin | UserRole::Management => true,
        UserRole::QaOps => gap.reporter_id == user.id,
        UserRole::Poc => gap.assigned_to_id == Some(user.id) || is_rostered,
    }
}

/// Apply the read predicate, resolving roster membership when the role
/// needs it. Fails with `Forbidden`.
pub async fn ensure_can_read_gap(
    user: &User,
    gap: &Gap,
    pocs: &PocRepository,
) -> AppResult<()> {
    let is_rostered = if user.role == UserRole::Poc {
        pocs.is_member(gap.id, user.id).await?
    } else {
        false
    };

    if can_read_gap(user, gap, is_rostered) {
        Ok(())
    } else {
        Err(AppError::forbidden("you do not have access to this gap"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn user(id: i64, role: UserRole) -> User {
        User {
            id,
            email: format!("user{id}@example.com"),
            employee_id: None,
            display_name: format!("User {id}"),
            role,
            department: None,
            password_hash: "x".to_string(),
            created_at: Utc::now(),
        }
    }

    fn gap(reporter_id: i64, assigned_to_id: Option<i64>) -> Gap {
        let now = Utc::now();
        Gap {
            id: 10,
            gap_id: "GAP-0010".to_string(),
            title: "t".to_string(),
            description: "d".to_string(),
            status: crate::models::GapStatus::Assigned,
            priority: crate::models::GapPriority::Medium,
            severity: None,
            department: None,
            reporter_id,
            assigned_to_id,
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
            ai_processed: true,
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

    #[test]
    fn test_admin_and_management_read_everything() {
        let g = gap(1, None);
        assert!(can_read_gap(&user(99, UserRole::Admin), &g, false));
        assert!(can_read_gap(&user(99, UserRole::Management), &g, false));
    }

    #[test]
    fn test_qa_ops_scoped_to_own_reports() {
        let g = gap(5, None);
        assert!(can_read_gap(&user(5, UserRole::QaOps), &g, false));
        assert!(!can_read_gap(&user(6, UserRole::QaOps), &g, false));
    }

    #[test]
    fn test_poc_needs_assignment_or_roster() {
        let g = gap(1, Some(7));
        assert!(can_read_gap(&user(7, UserRole::Poc), &g, false));
        assert!(can_read_gap(&user(8, UserRole::Poc), &g, true));
        assert!(!can_read_gap(&user(8, UserRole::Poc), &g, false));
    }

    #[test]
    fn test_require_role() {
        let mgmt = user(1, UserRole::Management);
        assert!(require_role(&mgmt, &[UserRole::Admin, UserRole::Management]).is_ok());
        assert!(require_role(&mgmt, &[UserRole::Admin]).is_err());
    }

    #[test]
    fn test_read_scope_per_role() {
        assert_eq!(read_scope(&user(1, UserRole::Admin)), GapReadScope::All);
        assert_eq!(
            read_scope(&user(2, UserRole::QaOps)),
            GapReadScope::Reporter(2)
        );
        assert_eq!(read_scope(&user(3, UserRole::Poc)), GapReadScope::Poc(3));
    }
}
