//! Timeline synthesis
//!
//! A gap has no event table of its own; its lifecycle view is merged
//! from three sources that partially overlap:
//! - the per-transition timestamp columns on the gap row,
//! - `resolution_history` (earlier resolve/reopen cycles),
//! - the audit log.
//!
//! Entries sort ascending by timestamp; entries sharing a timestamp
//! tie-break by event type in the fixed order {created, assigned,
//! in_progress, resolved, reopened, closed, audit}. Overlapping sources
//! de-duplicate by (type, ±2 s).

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::models::{AuditLogEntry, Gap, ResolutionHistoryEntry};

/// Window inside which two same-type entries are considered one event
const DEDUP_WINDOW_SECS: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimelineEntryType {
    Created,
    Assigned,
    InProgress,
    Resolved,
    Reopened,
    Closed,
    Audit,
}

impl TimelineEntryType {
    /// Fixed tie-break rank for entries sharing a timestamp
    fn rank(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Assigned => 1,
            Self::InProgress => 2,
            Self::Resolved => 3,
            Self::Reopened => 4,
            Self::Closed => 5,
            Self::Audit => 6,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    #[serde(rename = "type")]
    pub entry_type: TimelineEntryType,
    pub timestamp: DateTime<Utc>,
    pub actor_id: Option<i64>,
    pub detail: Option<String>,
}

impl TimelineEntry {
    fn new(
        entry_type: TimelineEntryType,
        timestamp: DateTime<Utc>,
        actor_id: Option<i64>,
        detail: Option<String>,
    ) -> Self {
        Self {
            entry_type,
            timestamp,
            actor_id,
            detail,
        }
    }
}

/// Build the merged, ordered, de-duplicated timeline.
pub fn synthesize(
    gap: &Gap,
    history: &[ResolutionHistoryEntry],
    audit: &[AuditLogEntry],
) -> Vec<TimelineEntry> {
    let mut entries = Vec::new();

    entries.push(TimelineEntry::new(
        TimelineEntryType::Created,
        gap.created_at,
        Some(gap.reporter_id),
        None,
    ));

    if let Some(at) = gap.assigned_at {
        entries.push(TimelineEntry::new(
            TimelineEntryType::Assigned,
            at,
            gap.assigned_by_id,
            gap.assigned_to_id.map(|id| format!("assigned to user {id}")),
        ));
    }
    if let Some(at) = gap.in_progress_at {
        entries.push(TimelineEntry::new(
            TimelineEntryType::InProgress,
            at,
            gap.updated_by_id,
            None,
        ));
    }
    if let Some(at) = gap.resolved_at {
        entries.push(TimelineEntry::new(
            TimelineEntryType::Resolved,
            at,
            gap.resolved_by_id,
            gap.resolution_summary.clone(),
        ));
    }
    if let Some(at) = gap.reopened_at {
        entries.push(TimelineEntry::new(
            TimelineEntryType::Reopened,
            at,
            gap.reopened_by_id,
            None,
        ));
    }
    if let Some(at) = gap.closed_at {
        entries.push(TimelineEntry::new(
            TimelineEntryType::Closed,
            at,
            gap.closed_by_id,
            gap.duplicate_of_id.map(|id| format!("duplicate of gap {id}")),
        ));
    }

    // Earlier resolve/reopen cycles live only in history.
    for cycle in history {
        entries.push(TimelineEntry::new(
            TimelineEntryType::Resolved,
            cycle.resolved_at,
            cycle.resolved_by_id,
            Some(cycle.resolution_summary.clone()),
        ));
        if let Some(at) = cycle.reopened_at {
            entries.push(TimelineEntry::new(
                TimelineEntryType::Reopened,
                at,
                cycle.reopened_by_id,
                None,
            ));
        }
    }

    for row in audit {
        entries.push(TimelineEntry::new(
            TimelineEntryType::Audit,
            row.created_at,
            row.actor_id,
            Some(row.action.clone()),
        ));
    }

    entries.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then(a.entry_type.rank().cmp(&b.entry_type.rank()))
    });

    dedup(entries)
}

/// Drop an entry when one of the same type was already kept within the
/// ±2 s window. The list is sorted, so checking the kept tail suffices.
fn dedup(entries: Vec<TimelineEntry>) -> Vec<TimelineEntry> {
    let window = Duration::seconds(DEDUP_WINDOW_SECS);
    let mut kept: Vec<TimelineEntry> = Vec::with_capacity(entries.len());

    for entry in entries {
        let duplicate = kept.iter().rev().any(|prev| {
            prev.entry_type == entry.entry_type
                && (entry.timestamp - prev.timestamp).abs() <= window
        });
        if !duplicate {
            kept.push(entry);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GapPriority, GapStatus};
    use chrono::TimeZone;
    use serde_json::json;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn base_gap() -> Gap {
        Gap {
            id: 1,
            gap_id: "GAP-0001".to_string(),
            title: "t".to_string(),
            description: "d".to_string(),
            status: GapStatus::Resolved,
            priority: GapPriority::Medium,
            severity: None,
            department: None,
            reporter_id: 10,
            assigned_to_id: Some(20),
            form_template_id: None,
            form_template_version: None,
            form_responses: None,
            tat_deadline: None,
            tat_alert_stage: 0,
            assigned_at: Some(ts(100)),
            assigned_by_id: Some(30),
            in_progress_at: Some(ts(200)),
            resolved_at: Some(ts(300)),
            resolved_by_id: Some(20),
            closed_at: None,
            closed_by_id: None,
            reopened_at: None,
            reopened_by_id: None,
            ai_processed: true,
            attachments: json!([]),
            sop_suggestions: None,
            resolution_summary: Some("fixed".to_string()),
            resolution_attachments: None,
            duplicate_of_id: None,
            created_at: ts(0),
            updated_at: ts(300),
            updated_by_id: Some(20),
        }
    }

    fn audit_row(secs: i64, action: &str) -> AuditLogEntry {
        AuditLogEntry {
            id: 1,
            actor_id: Some(30),
            action: action.to_string(),
            entity_type: "gaps".to_string(),
            entity_id: "1".to_string(),
            changes: None,
            ip_address: None,
            user_agent: None,
            created_at: ts(secs),
        }
    }

    #[test]
    fn test_orders_ascending() {
        let timeline = synthesize(&base_gap(), &[], &[]);
        let types: Vec<_> = timeline.iter().map(|e| e.entry_type).collect();
        assert_eq!(
            types,
            vec![
                TimelineEntryType::Created,
                TimelineEntryType::Assigned,
                TimelineEntryType::InProgress,
                TimelineEntryType::Resolved,
            ]
        );
        assert!(timeline.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_history_cycles_appear() {
        let history = vec![ResolutionHistoryEntry {
            id: 1,
            gap_id: 1,
            resolution_summary: "first fix".to_string(),
            resolution_attachments: None,
            resolved_by_id: Some(20),
            resolved_at: ts(50),
            reopened_by_id: Some(10),
            reopened_at: Some(ts(60)),
        }];
        let timeline = synthesize(&base_gap(), &history, &[]);

        let resolved: Vec<_> = timeline
            .iter()
            .filter(|e| e.entry_type == TimelineEntryType::Resolved)
            .collect();
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].detail.as_deref(), Some("first fix"));

        assert!(timeline
            .iter()
            .any(|e| e.entry_type == TimelineEntryType::Reopened && e.timestamp == ts(60)));
    }

    #[test]
    fn test_dedup_within_window() {
        // The same resolve surfaced by both the gap row and a history row
        // one second apart collapses into one entry.
        let history = vec![ResolutionHistoryEntry {
            id: 1,
            gap_id: 1,
            resolution_summary: "fixed".to_string(),
            resolution_attachments: None,
            resolved_by_id: Some(20),
            resolved_at: ts(301),
            reopened_by_id: None,
            reopened_at: None,
        }];
        let timeline = synthesize(&base_gap(), &history, &[]);
        let resolved_count = timeline
            .iter()
            .filter(|e| e.entry_type == TimelineEntryType::Resolved)
            .count();
        assert_eq!(resolved_count, 1);
    }

    #[test]
    fn test_different_types_never_dedup() {
        // An audit row at the exact resolve instant is kept: the window
        // only collapses entries of the same type.
        let timeline = synthesize(&base_gap(), &[], &[audit_row(300, "UPDATE_GAP_STATUS")]);
        assert!(timeline
            .iter()
            .any(|e| e.entry_type == TimelineEntryType::Audit));
        assert!(timeline
            .iter()
            .any(|e| e.entry_type == TimelineEntryType::Resolved));
    }

    #[test]
    fn test_tie_break_follows_fixed_order() {
        // Force every lifecycle column onto one instant; the output must
        // follow the canonical type order.
        let mut gap = base_gap();
        gap.assigned_at = Some(ts(0));
        gap.in_progress_at = Some(ts(0));
        gap.resolved_at = Some(ts(0));
        let timeline = synthesize(&gap, &[], &[audit_row(0, "CREATE_GAP")]);
        let ranks: Vec<_> = timeline.iter().map(|e| e.entry_type.rank()).collect();
        let mut sorted = ranks.clone();
        sorted.sort();
        assert_eq!(ranks, sorted);
    }

    #[test]
    fn test_audit_entries_outside_window_survive() {
        let timeline = synthesize(
            &base_gap(),
            &[],
            &[audit_row(300, "UPDATE_GAP_STATUS"), audit_row(310, "ASSIGN_GAP")],
        );
        let audits = timeline
            .iter()
            .filter(|e| e.entry_type == TimelineEntryType::Audit)
            .count();
        assert_eq!(audits, 2);
    }
}
