//! The gap state machine
//!
//! Canonical transitions:
//!
//! ```text
//!                  create
//!                    │
//!                    ▼
//!       ┌────► PendingAI ──AI done──► NeedsReview
//!       │                                 │ assign
//!       │                                 ▼
//!       │                             Assigned ──start──► InProgress
//!       │                                 │                  │
//!       │                                 │ resolve          │ resolve
//!       │                                 ▼                  ▼
//!       │                             Resolved ◄─────────────┘
//!       │                                 │
//!       │ reopen                          │ close
//!       └─────────────────────────── Reopened                │
//!                                         │                  ▼
//!                                 resolve─┘               Closed (terminal)
//! ```
//!
//! `Reopened` starts a new cycle: it may be re-assigned or resolved
//! directly. `mark-duplicate` is a privileged path from any non-Closed
//! state straight to `Closed` and bypasses this matrix (its own guard
//! lives in the service). Any transition not listed here is rejected.

use crate::error::{AppError, AppResult};
use crate::models::GapStatus;

/// Whether `from → to` is a legal non-privileged transition.
pub fn can_transition(from: GapStatus, to: GapStatus) -> bool {
    use GapStatus::*;
    matches!(
        (from, to),
        (PendingAi, NeedsReview)
            | (NeedsReview, Assigned)
            // Re-assignment keeps the gap in (or returns it to) Assigned.
            | (Assigned, Assigned)
            | (Assigned, InProgress)
            | (Assigned, Resolved)
            | (InProgress, Assigned)
            | (InProgress, Resolved)
            | (Resolved, Reopened)
            | (Resolved, Closed)
            | (Closed, Reopened)
            | (Reopened, Assigned)
            | (Reopened, Resolved)
    )
}

/// Validate a transition, surfacing the rejected pair.
pub fn ensure_transition(from: GapStatus, to: GapStatus) -> AppResult<()> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(AppError::conflict(format!(
            "cannot transition gap from {from:?} to {to:?}"
        )))
    }
}

/// States from which `assign` may run.
pub fn can_assign_from(status: GapStatus) -> bool {
    can_transition(status, GapStatus::Assigned)
}

/// States from which `resolve` may run.
pub fn can_resolve_from(status: GapStatus) -> bool {
    can_transition(status, GapStatus::Resolved)
}

/// States from which `reopen` may run.
pub fn can_reopen_from(status: GapStatus) -> bool {
    matches!(status, GapStatus::Resolved | GapStatus::Closed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use GapStatus::*;

    const ALL: [GapStatus; 7] = [
        PendingAi,
        NeedsReview,
        Assigned,
        InProgress,
        Resolved,
        Closed,
        Reopened,
    ];

    #[test]
    fn test_closed_is_terminal_except_reopen() {
        for to in ALL {
            let legal = can_transition(Closed, to);
            assert_eq!(legal, to == Reopened, "Closed -> {to:?}");
        }
    }

    #[test]
    fn test_pending_ai_only_advances_to_review() {
        for to in ALL {
            assert_eq!(can_transition(PendingAi, to), to == NeedsReview);
        }
    }

    #[test]
    fn test_reopened_starts_a_new_cycle() {
        assert!(can_transition(Reopened, Resolved));
        assert!(can_transition(Reopened, Assigned));
        assert!(!can_transition(Reopened, InProgress));
        assert!(!can_transition(Reopened, Closed));
    }

    #[test]
    fn test_resolve_sources() {
        assert!(can_resolve_from(Assigned));
        assert!(can_resolve_from(InProgress));
        assert!(can_resolve_from(Reopened));
        assert!(!can_resolve_from(NeedsReview));
        assert!(!can_resolve_from(PendingAi));
        assert!(!can_resolve_from(Closed));
    }

    #[test]
    fn test_reopen_sources() {
        assert!(can_reopen_from(Resolved));
        assert!(can_reopen_from(Closed));
        assert!(!can_reopen_from(InProgress));
        assert!(!can_reopen_from(Assigned));
    }

    #[test]
    fn test_no_demotion_paths() {
        assert!(!can_transition(NeedsReview, PendingAi));
        assert!(!can_transition(Assigned, NeedsReview));
        assert!(!can_transition(Resolved, InProgress));
    }

    #[test]
    fn test_ensure_transition_error_names_both_states() {
        let err = ensure_transition(Closed, Assigned).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Closed"));
        assert!(msg.contains("Assigned"));
    }
}
