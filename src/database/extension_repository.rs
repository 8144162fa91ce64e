//! TAT extension persistence

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use crate::error::{AppError, AppResult};
use crate::models::{ExtensionStatus, TatExtension};

pub struct ExtensionRepository {
    pool: PgPool,
}

impl ExtensionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        gap_id: i64,
        requested_by_id: i64,
        reason: &str,
        proposed_deadline: DateTime<Utc>,
    ) -> AppResult<TatExtension> {
        let extension = sqlx::query_as::<_, TatExtension>(
            r#"
            INSERT INTO tat_extensions (gap_id, requested_by_id, reason, proposed_deadline)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(gap_id)
        .bind(requested_by_id)
        .bind(reason)
        .bind(proposed_deadline)
        .fetch_one(&self.pool)
        .await?;
        Ok(extension)
    }

    pub async fn get(&self, id: i64) -> AppResult<TatExtension> {
        sqlx::query_as::<_, TatExtension>("SELECT * FROM tat_extensions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found(format!("extension {id}")))
    }

    pub async fn list(&self, status: Option<ExtensionStatus>) -> AppResult<Vec<TatExtension>> {
        let extensions = sqlx::query_as::<_, TatExtension>(
            r#"
            SELECT * FROM tat_extensions
            WHERE ($1::varchar IS NULL OR status = $1)
            ORDER BY created_at DESC
            "#,
        )
        .bind(status)
        .fetch_all(&self.pool)
        .await?;
        Ok(extensions)
    }

    pub async fn list_for_gap(&self, gap_id: i64) -> AppResult<Vec<TatExtension>> {
        let extensions = sqlx::query_as::<_, TatExtension>(
            "SELECT * FROM tat_extensions WHERE gap_id = $1 ORDER BY created_at DESC",
        )
        .bind(gap_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(extensions)
    }

    /// Record a decision. The `status = 'PENDING'` guard makes a second
    /// decision on the same extension fail with `Conflict`.
    pub async fn decide(
        tx: &mut Transaction<'_, Postgres>,
        id: i64,
        decision: ExtensionStatus,
        reviewer_id: i64,
    ) -> AppResult<TatExtension> {
        let extension = sqlx::query_as::<_, TatExtension>(
            r#"
            UPDATE tat_extensions SET
                status = $2,
                reviewed_by_id = $3,
                reviewed_at = now()
            WHERE id = $1 AND status = 'PENDING'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(decision)
        .bind(reviewer_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| AppError::conflict(format!("extension {id} has already been decided")))?;
        Ok(extension)
    }
}
