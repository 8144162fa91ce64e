//! POC roster persistence
//!
//! Invariants enforced here: (gap, user) uniqueness via the unique index,
//! and at most one primary row per gap (the clear happens in the same
//! transaction as the promote).

use sqlx::PgPool;

use crate::error::{AppError, AppResult};
use crate::models::GapPoc;

pub struct PocRepository {
    pool: PgPool,
}

impl PocRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list_for_gap(&self, gap_id: i64) -> AppResult<Vec<GapPoc>> {
        let pocs = sqlx::query_as::<_, GapPoc>(
            "SELECT * FROM gap_pocs WHERE gap_id = $1 ORDER BY is_primary DESC, created_at",
        )
        .bind(gap_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(pocs)
    }

    pub async fn find(&self, gap_id: i64, user_id: i64) -> AppResult<Option<GapPoc>> {
        let poc = sqlx::query_as::<_, GapPoc>(
            "SELECT * FROM gap_pocs WHERE gap_id = $1 AND user_id = $2",
        )
        .bind(gap_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(poc)
    }

    pub async fn is_member(&self, gap_id: i64, user_id: i64) -> AppResult<bool> {
        Ok(self.find(gap_id, user_id).await?.is_some())
    }

    pub async fn is_primary(&self, gap_id: i64, user_id: i64) -> AppResult<bool> {
        Ok(self
            .find(gap_id, user_id)
            .await?
            .map(|p| p.is_primary)
            .unwrap_or(false))
    }

    /// Add a user to the roster. Promoting to primary clears any existing
    /// primary row inside the same transaction as the insert.
    pub async fn add(
        &self,
        gap_id: i64,
        user_id: i64,
        is_primary: bool,
        added_by_id: i64,
    ) -> AppResult<GapPoc> {
        let mut tx = self.pool.begin().await?;

        if is_primary {
            sqlx::query("UPDATE gap_pocs SET is_primary = FALSE WHERE gap_id = $1 AND is_primary")
                .bind(gap_id)
                .execute(&mut *tx)
                .await?;
        }

        let poc = sqlx::query_as::<_, GapPoc>(
            r#"
            INSERT INTO gap_pocs (gap_id, user_id, is_primary, added_by_id)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(gap_id)
        .bind(user_id)
        .bind(is_primary)
        .bind(added_by_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match AppError::from(e) {
            AppError::Conflict(_) => {
                AppError::conflict(format!("user {user_id} is already a POC on this gap"))
            }
            other => other,
        })?;

        tx.commit().await?;
        Ok(poc)
    }

    /// Promote an existing roster member to primary, demoting the old one
    /// atomically.
    pub async fn set_primary(&self, gap_id: i64, user_id: i64) -> AppResult<GapPoc> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE gap_pocs SET is_primary = FALSE WHERE gap_id = $1 AND is_primary")
            .bind(gap_id)
            .execute(&mut *tx)
            .await?;

        let poc = sqlx::query_as::<_, GapPoc>(
            r#"
            UPDATE gap_pocs SET is_primary = TRUE
            WHERE gap_id = $1 AND user_id = $2
            RETURNING *
            "#,
        )
        .bind(gap_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::not_found(format!("POC {user_id} on gap {gap_id}")))?;

        tx.commit().await?;
        Ok(poc)
    }

    pub async fn remove(&self, gap_id: i64, user_id: i64) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM gap_pocs WHERE gap_id = $1 AND user_id = $2")
            .bind(gap_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("POC {user_id} on gap {gap_id}")));
        }
        Ok(())
    }
}
