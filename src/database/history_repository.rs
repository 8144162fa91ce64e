//! Resolution history and assignment audit rows
//!
//! `resolution_history` records one row per resolution cycle: resolve
//! opens the row (with `reopened_at` null), and a later reopen stamps it
//! inside the same transaction that clears the gap's live resolution
//! fields. At any moment a gap has at most one open row.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};

use crate::error::AppResult;
use crate::models::{Assignment, ResolutionHistoryEntry};

pub struct HistoryRepository {
    pool: PgPool,
}

impl HistoryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a new resolution cycle, inside the resolving transaction.
    pub async fn open_cycle(
        tx: &mut Transaction<'_, Postgres>,
        gap_id: i64,
        summary: &str,
        attachments: Option<&Value>,
        resolved_by_id: i64,
        resolved_at: DateTime<Utc>,
    ) -> AppResult<ResolutionHistoryEntry> {
        let entry = sqlx::query_as::<_, ResolutionHistoryEntry>(
            r#"
            INSERT INTO resolution_history (
                gap_id, resolution_summary, resolution_attachments,
                resolved_by_id, resolved_at
            )
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(gap_id)
        .bind(summary)
        .bind(attachments)
        .bind(resolved_by_id)
        .bind(resolved_at)
        .fetch_one(&mut **tx)
        .await?;
        Ok(entry)
    }

    /// Close out the gap's open cycle at reopen. Returns `None` when no
    /// open row exists (nothing was resolved since the last reopen).
    pub async fn stamp_reopen(
        tx: &mut Transaction<'_, Postgres>,
        gap_id: i64,
        reopened_by_id: i64,
    ) -> AppResult<Option<ResolutionHistoryEntry>> {
        let entry = sqlx::query_as::<_, ResolutionHistoryEntry>(
            r#"
            UPDATE resolution_history SET
                reopened_by_id = $2,
                reopened_at = now()
            WHERE gap_id = $1 AND reopened_at IS NULL
            RETURNING *
            "#,
        )
        .bind(gap_id)
        .bind(reopened_by_id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(entry)
    }

    pub async fn list_for_gap(&self, gap_id: i64) -> AppResult<Vec<ResolutionHistoryEntry>> {
        let entries = sqlx::query_as::<_, ResolutionHistoryEntry>(
            "SELECT * FROM resolution_history WHERE gap_id = $1 ORDER BY resolved_at",
        )
        .bind(gap_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    /// Append the audit row for a (re)assignment, inside the assigning
    /// transaction.
    pub async fn append_assignment(
        tx: &mut Transaction<'_, Postgres>,
        gap_id: i64,
        assigned_to_id: i64,
        assigned_by_id: i64,
        note: Option<&str>,
    ) -> AppResult<Assignment> {
        let assignment = sqlx::query_as::<_, Assignment>(
            r#"
            INSERT INTO assignments (gap_id, assigned_to_id, assigned_by_id, note)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(gap_id)
        .bind(assigned_to_id)
        .bind(assigned_by_id)
        .bind(note)
        .fetch_one(&mut **tx)
        .await?;
        Ok(assignment)
    }

    pub async fn list_assignments(&self, gap_id: i64) -> AppResult<Vec<Assignment>> {
        let assignments = sqlx::query_as::<_, Assignment>(
            "SELECT * FROM assignments WHERE gap_id = $1 ORDER BY created_at",
        )
        .bind(gap_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(assignments)
    }
}
