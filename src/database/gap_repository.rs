//! Gap persistence: CRUD, scoped reads, human-ID minting, and the
//! column updates backing each state-machine transition
//!
//! Transition writes take a `Transaction` so the caller can wrap them in
//! the per-gap advisory lock; plain reads go straight to the pool.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};

use super::locks;
use crate::error::{AppError, AppResult};
use crate::models::{Gap, GapPriority, GapStatus};

/// Advisory-lock key serializing human-ID minting across inserts
const GAP_MINT_LOCK_KEY: i64 = 0x6761_706f_7073_0001;

/// Format the human-readable id: zero-padded to at least four digits
pub fn format_gap_id(n: i64) -> String {
    format!("GAP-{n:04}")
}

/// Read scope resolved from the caller's role (see `auth::rbac`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapReadScope {
    /// Admin and Management see everything
    All,
    /// QA/Ops see only gaps they reported
    Reporter(i64),
    /// POCs see gaps where they are primary assignee or rostered
    Poc(i64),
}

/// Fields captured at gap creation
#[derive(Debug, Clone)]
pub struct NewGap {
    pub title: String,
    pub description: String,
    pub priority: GapPriority,
    pub severity: Option<String>,
    pub department: Option<String>,
    pub reporter_id: i64,
    pub form_template_id: Option<i64>,
    pub form_template_version: Option<String>,
    pub form_responses: Option<Value>,
    pub attachments: Value,
}

/// Mutable content fields merged by `updateGap`
#[derive(Debug, Clone)]
pub struct GapContentUpdate {
    pub title: String,
    pub description: String,
    pub priority: GapPriority,
    pub severity: Option<String>,
    pub department: Option<String>,
    pub form_responses: Option<Value>,
    pub attachments: Value,
    pub updated_by_id: i64,
}

pub struct GapRepository {
    pool: PgPool,
}

impl GapRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ========================================================================
    // Creation and id minting
    // ========================================================================

    /// Insert a gap in state `PendingAI` with a freshly minted `GAP-NNNN` id.
    ///
    /// Minting serializes on an advisory lock and takes `max(suffix) + 1`,
    /// so ids stay monotonic even if rows are ever purged. The unique index
    /// on `gap_id` is the backstop under races.
    pub async fn create(&self, draft: NewGap) -> AppResult<Gap> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(GAP_MINT_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        let (max_suffix,): (i64,) = sqlx::query_as(
            r#"
            SELECT COALESCE(MAX(CAST(SUBSTRING(gap_id FROM 5) AS BIGINT)), 0)
            FROM gaps
            "#,
        )
        .fetch_one(&mut *tx)
        .await?;

        let gap_id = format_gap_id(max_suffix + 1);

        let gap = sqlx::query_as::<_, Gap>(
            r#"
            INSERT INTO gaps (
                gap_id, title, description, status, priority, severity,
                department, reporter_id, form_template_id,
                form_template_version, form_responses, attachments,
                ai_processed
            )
            VALUES ($1, $2, $3, 'PENDING_AI', $4, $5, $6, $7, $8, $9, $10, $11, FALSE)
            RETURNING *
            "#,
        )
        .bind(&gap_id)
        .bind(&draft.title)
        .bind(&draft.description)
        .bind(draft.priority)
        .bind(&draft.severity)
        .bind(&draft.department)
        .bind(draft.reporter_id)
        .bind(draft.form_template_id)
        .bind(&draft.form_template_version)
        .bind(&draft.form_responses)
        .bind(&draft.attachments)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(gap)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn find(&self, id: i64) -> AppResult<Option<Gap>> {
        let gap = sqlx::query_as::<_, Gap>("SELECT * FROM gaps WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(gap)
    }

    pub async fn get(&self, id: i64) -> AppResult<Gap> {
        self.find(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("gap {id}")))
    }

    /// Re-read a gap inside an open transaction, after the advisory lock
    /// has been taken. Guards re-evaluate against this snapshot.
    pub async fn get_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        id: i64,
    ) -> AppResult<Gap> {
        let gap = sqlx::query_as::<_, Gap>("SELECT * FROM gaps WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or_else(|| AppError::not_found(format!("gap {id}")))?;
        Ok(gap)
    }

    /// List gaps visible in the given scope, newest first, optionally
    /// narrowed to one status.
    pub async fn filtered(
        &self,
        scope: GapReadScope,
        status: Option<GapStatus>,
    ) -> AppResult<Vec<Gap>> {
        let gaps = match scope {
            GapReadScope::All => {
                sqlx::query_as::<_, Gap>(
                    r#"
                    SELECT * FROM gaps
                    WHERE ($1::varchar IS NULL OR status = $1)
                    ORDER BY created_at DESC
                    "#,
                )
                .bind(status)
                .fetch_all(&self.pool)
                .await?
            }
            GapReadScope::Reporter(user_id) => {
                sqlx::query_as::<_, Gap>(
                    r#"
                    SELECT * FROM gaps
                    WHERE reporter_id = $1
                      AND ($2::varchar IS NULL OR status = $2)
                    ORDER BY created_at DESC
                    "#,
                )
                .bind(user_id)
                .bind(status)
                .fetch_all(&self.pool)
                .await?
            }
            GapReadScope::Poc(user_id) => {
                // Union of primary-assignee and roster membership,
                // de-duplicated by the outer DISTINCT.
                sqlx::query_as::<_, Gap>(
                    r#"
                    SELECT DISTINCT g.* FROM gaps g
                    LEFT JOIN gap_pocs p ON p.gap_id = g.id
                    WHERE (g.assigned_to_id = $1 OR p.user_id = $1)
                      AND ($2::varchar IS NULL OR g.status = $2)
                    ORDER BY g.created_at DESC
                    "#,
                )
                .bind(user_id)
                .bind(status)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(gaps)
    }

    /// Gap ids a POC user may read: primary assignments unioned with
    /// roster rows, de-duplicated by the UNION itself.
    pub async fn ids_for_poc(&self, user_id: i64) -> AppResult<Vec<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            r#"
            SELECT id FROM gaps WHERE assigned_to_id = $1
            UNION
            SELECT gap_id FROM gap_pocs WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Fetch several gaps by id. An empty id set returns an empty Vec
    /// without generating SQL (no `IN ()`).
    pub async fn get_many(&self, ids: &[i64]) -> AppResult<Vec<Gap>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let gaps = sqlx::query_as::<_, Gap>(
            "SELECT * FROM gaps WHERE id = ANY($1) ORDER BY created_at DESC",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(gaps)
    }

    /// All non-Closed gaps except the one given; the enricher compares
    /// the enqueued gap against this set.
    pub async fn list_live_except(&self, id: i64) -> AppResult<Vec<Gap>> {
        let gaps = sqlx::query_as::<_, Gap>(
            "SELECT * FROM gaps WHERE id != $1 AND status != 'CLOSED'",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(gaps)
    }

    // ========================================================================
    // Content updates
    // ========================================================================

    /// Write the merged content fields and bump `updated_at`/`updated_by_id`.
    pub async fn update_content(
        &self,
        id: i64,
        update: GapContentUpdate,
    ) -> AppResult<Gap> {
        let gap = sqlx::query_as::<_, Gap>(
            r#"
            UPDATE gaps SET
                title = $2,
                description = $3,
                priority = $4,
                severity = $5,
                department = $6,
                form_responses = $7,
                attachments = $8,
                updated_by_id = $9,
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&update.title)
        .bind(&update.description)
        .bind(update.priority)
        .bind(&update.severity)
        .bind(&update.department)
        .bind(&update.form_responses)
        .bind(&update.attachments)
        .bind(update.updated_by_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(gap)
    }

    // ========================================================================
    // Transition writes (inside the per-gap lock)
    // ========================================================================

    /// Open a transaction already holding the gap's advisory lock.
    pub async fn begin_locked(
        &self,
        gap_id: i64,
    ) -> AppResult<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await?;
        locks::lock_gap(&mut tx, gap_id).await?;
        Ok(tx)
    }

    pub async fn set_assigned(
        tx: &mut Transaction<'_, Postgres>,
        id: i64,
        assignee_id: i64,
        actor_id: i64,
        deadline: Option<DateTime<Utc>>,
        priority: Option<GapPriority>,
    ) -> AppResult<Gap> {
        let gap = sqlx::query_as::<_, Gap>(
            r#"
            UPDATE gaps SET
                status = 'ASSIGNED',
                assigned_to_id = $2,
                assigned_by_id = $3,
                assigned_at = now(),
                tat_deadline = COALESCE($4, tat_deadline),
                tat_alert_stage = CASE WHEN $4 IS NOT NULL THEN 0 ELSE tat_alert_stage END,
                priority = COALESCE($5, priority),
                updated_by_id = $3,
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(assignee_id)
        .bind(actor_id)
        .bind(deadline)
        .bind(priority)
        .fetch_one(&mut **tx)
        .await?;
        Ok(gap)
    }

    pub async fn set_in_progress(
        tx: &mut Transaction<'_, Postgres>,
        id: i64,
        actor_id: i64,
    ) -> AppResult<Gap> {
        let gap = sqlx::query_as::<_, Gap>(
            r#"
            UPDATE gaps SET
                status = 'IN_PROGRESS',
                in_progress_at = now(),
                updated_by_id = $2,
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(actor_id)
        .fetch_one(&mut **tx)
        .await?;
        Ok(gap)
    }

    pub async fn set_resolved(
        tx: &mut Transaction<'_, Postgres>,
        id: i64,
        actor_id: i64,
        summary: &str,
        attachments: &Value,
    ) -> AppResult<Gap> {
        let gap = sqlx::query_as::<_, Gap>(
            r#"
            UPDATE gaps SET
                status = 'RESOLVED',
                resolution_summary = $3,
                resolution_attachments = $4,
                resolved_at = now(),
                resolved_by_id = $2,
                updated_by_id = $2,
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(actor_id)
        .bind(summary)
        .bind(attachments)
        .fetch_one(&mut **tx)
        .await?;
        Ok(gap)
    }

    /// Clear the live resolution fields and enter `Reopened`. The caller
    /// appends the history row first, in the same transaction.
    pub async fn apply_reopen(
        tx: &mut Transaction<'_, Postgres>,
        id: i64,
        actor_id: i64,
    ) -> AppResult<Gap> {
        let gap = sqlx::query_as::<_, Gap>(
            r#"
            UPDATE gaps SET
                status = 'REOPENED',
                resolution_summary = NULL,
                resolution_attachments = NULL,
                resolved_at = NULL,
                resolved_by_id = NULL,
                reopened_at = now(),
                reopened_by_id = $2,
                tat_alert_stage = 0,
                updated_by_id = $2,
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(actor_id)
        .fetch_one(&mut **tx)
        .await?;
        Ok(gap)
    }

    pub async fn set_closed(
        tx: &mut Transaction<'_, Postgres>,
        id: i64,
        actor_id: i64,
        duplicate_of_id: Option<i64>,
    ) -> AppResult<Gap> {
        let gap = sqlx::query_as::<_, Gap>(
            r#"
            UPDATE gaps SET
                status = 'CLOSED',
                duplicate_of_id = COALESCE($3, duplicate_of_id),
                closed_at = now(),
                closed_by_id = $2,
                updated_by_id = $2,
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(actor_id)
        .bind(duplicate_of_id)
        .fetch_one(&mut **tx)
        .await?;
        Ok(gap)
    }

    pub async fn set_tat_deadline(
        tx: &mut Transaction<'_, Postgres>,
        id: i64,
        deadline: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE gaps SET
                tat_deadline = $2,
                tat_alert_stage = 0,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(deadline)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    // ========================================================================
    // Enrichment write-back
    // ========================================================================

    /// Persist enrichment results, advance `PendingAI` gaps to
    /// `NeedsReview`, and mark the gap AI-processed.
    ///
    /// The update is conditional on `updated_at` still matching the
    /// snapshot taken when the job started: a newer content edit
    /// supersedes the job and the results are discarded (returns `false`).
    /// The status CASE never demotes a gap that already moved on, and a
    /// Closed gap is never revived.
    pub async fn write_enrichment(
        &self,
        id: i64,
        sop_suggestions: Option<&Value>,
        snapshot_updated_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE gaps SET
                sop_suggestions = COALESCE($2, sop_suggestions),
                ai_processed = TRUE,
                status = CASE WHEN status = 'PENDING_AI' THEN 'NEEDS_REVIEW' ELSE status END,
                updated_at = now()
            WHERE id = $1 AND updated_at = $3
            "#,
        )
        .bind(id)
        .bind(sop_suggestions)
        .bind(snapshot_updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // TAT sweep support
    // ========================================================================

    /// Gaps with a deadline that still counts: status not Resolved/Closed.
    pub async fn list_tat_candidates(&self) -> AppResult<Vec<Gap>> {
        let gaps = sqlx::query_as::<_, Gap>(
            r#"
            SELECT * FROM gaps
            WHERE tat_deadline IS NOT NULL
              AND status NOT IN ('RESOLVED', 'CLOSED')
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(gaps)
    }

    /// Record that the sweep emitted an alert; guarded on the current
    /// stage so a concurrent sweep never double-advances.
    pub async fn advance_tat_alert_stage(
        &self,
        id: i64,
        from_stage: i16,
        to_stage: i16,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE gaps SET tat_alert_stage = $3 WHERE id = $1 AND tat_alert_stage = $2",
        )
        .bind(id)
        .bind(from_stage)
        .bind(to_stage)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gap_id_format_padding() {
        assert_eq!(format_gap_id(1), "GAP-0001");
        assert_eq!(format_gap_id(42), "GAP-0042");
        assert_eq!(format_gap_id(9999), "GAP-9999");
    }

    #[test]
    fn test_gap_id_format_grows_past_four_digits() {
        assert_eq!(format_gap_id(10000), "GAP-10000");
        assert_eq!(format_gap_id(123456), "GAP-123456");
    }

    #[test]
    fn test_gap_id_format_matches_contract() {
        let re = regex::Regex::new(r"^GAP-\d{4,}$").unwrap();
        for n in [1, 7, 999, 10000, 5000000] {
            assert!(re.is_match(&format_gap_id(n)), "bad id for {n}");
        }
    }
}
