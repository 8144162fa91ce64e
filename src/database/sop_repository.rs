//! SOP persistence and hierarchical id minting
//!
//! Root documents mint `SOP-NNN`; children mint `<parent_sop_id>-#NN`
//! where NN counts the parent's existing children at creation time. An
//! id is allocated once and only re-minted when the parent changes.

use sqlx::{PgPool, Postgres, Transaction};

use crate::error::{AppError, AppResult};
use crate::models::Sop;

/// Advisory-lock key serializing SOP id minting
const SOP_MINT_LOCK_KEY: i64 = 0x6761_706f_7073_0002;

pub fn format_root_sop_id(n: i64) -> String {
    format!("SOP-{n:03}")
}

pub fn format_child_sop_id(parent_sop_id: &str, n: i64) -> String {
    format!("{parent_sop_id}-#{n:02}")
}

/// Fields captured at SOP creation
#[derive(Debug, Clone)]
pub struct NewSop {
    pub title: String,
    pub description: Option<String>,
    pub body: String,
    pub category: Option<String>,
    pub department: Option<String>,
    pub parent_sop_id: Option<i64>,
    pub version: String,
    pub created_by_id: i64,
}

/// Mutable fields for an SOP update; `parent_sop_id` changing re-mints
#[derive(Debug, Clone)]
pub struct SopUpdate {
    pub title: String,
    pub description: Option<String>,
    pub body: String,
    pub category: Option<String>,
    pub department: Option<String>,
    pub parent_sop_id: Option<i64>,
    pub version: String,
    pub is_active: bool,
}

pub struct SopRepository {
    pool: PgPool,
}

impl SopRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn mint_id(
        tx: &mut Transaction<'_, Postgres>,
        parent_sop_id: Option<i64>,
    ) -> AppResult<String> {
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(SOP_MINT_LOCK_KEY)
            .execute(&mut **tx)
            .await?;

        match parent_sop_id {
            None => {
                let (max_suffix,): (i64,) = sqlx::query_as(
                    r#"
                    SELECT COALESCE(MAX(CAST(SUBSTRING(sop_id FROM 5) AS BIGINT)), 0)
                    FROM sops
                    WHERE parent_sop_id IS NULL
                    "#,
                )
                .fetch_one(&mut **tx)
                .await?;
                Ok(format_root_sop_id(max_suffix + 1))
            }
            Some(parent_id) => {
                let (parent_sop_id_str,): (String,) =
                    sqlx::query_as("SELECT sop_id FROM sops WHERE id = $1")
                        .bind(parent_id)
                        .fetch_optional(&mut **tx)
                        .await?
                        .ok_or_else(|| AppError::not_found(format!("parent SOP {parent_id}")))?;

                let (child_count,): (i64,) =
                    sqlx::query_as("SELECT COUNT(*) FROM sops WHERE parent_sop_id = $1")
                        .bind(parent_id)
                        .fetch_one(&mut **tx)
                        .await?;

                Ok(format_child_sop_id(&parent_sop_id_str, child_count + 1))
            }
        }
    }

    pub async fn create(&self, draft: NewSop) -> AppResult<Sop> {
        let mut tx = self.pool.begin().await?;
        let sop_id = Self::mint_id(&mut tx, draft.parent_sop_id).await?;

        let sop = sqlx::query_as::<_, Sop>(
            r#"
            INSERT INTO sops (
                sop_id, title, description, body, category, department,
                parent_sop_id, version, created_by_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(&sop_id)
        .bind(&draft.title)
        .bind(&draft.description)
        .bind(&draft.body)
        .bind(&draft.category)
        .bind(&draft.department)
        .bind(draft.parent_sop_id)
        .bind(&draft.version)
        .bind(draft.created_by_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(sop)
    }

    pub async fn get(&self, id: i64) -> AppResult<Sop> {
        sqlx::query_as::<_, Sop>("SELECT * FROM sops WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found(format!("SOP {id}")))
    }

    pub async fn list(&self, include_inactive: bool) -> AppResult<Vec<Sop>> {
        let sops = sqlx::query_as::<_, Sop>(
            r#"
            SELECT * FROM sops
            WHERE ($1 OR is_active)
            ORDER BY sop_id
            "#,
        )
        .bind(include_inactive)
        .fetch_all(&self.pool)
        .await?;
        Ok(sops)
    }

    /// Active SOPs only; the enricher ranks against this set.
    pub async fn list_active(&self) -> AppResult<Vec<Sop>> {
        self.list(false).await
    }

    /// Apply an update. The sop_id survives every edit except a parent
    /// change, which re-mints under the new parent.
    pub async fn update(&self, id: i64, update: SopUpdate) -> AppResult<Sop> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, Sop>("SELECT * FROM sops WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::not_found(format!("SOP {id}")))?;

        if update.parent_sop_id == Some(id) {
            return Err(AppError::invalid("an SOP cannot be its own parent"));
        }

        let sop_id = if update.parent_sop_id != current.parent_sop_id {
            Self::mint_id(&mut tx, update.parent_sop_id).await?
        } else {
            current.sop_id.clone()
        };

        let sop = sqlx::query_as::<_, Sop>(
            r#"
            UPDATE sops SET
                sop_id = $2,
                title = $3,
                description = $4,
                body = $5,
                category = $6,
                department = $7,
                parent_sop_id = $8,
                version = $9,
                is_active = $10,
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&sop_id)
        .bind(&update.title)
        .bind(&update.description)
        .bind(&update.body)
        .bind(&update.category)
        .bind(&update.department)
        .bind(update.parent_sop_id)
        .bind(&update.version)
        .bind(update.is_active)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(sop)
    }

    /// Soft delete: deactivate rather than remove, so gaps keep their
    /// cached suggestion references.
    pub async fn deactivate(&self, id: i64) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE sops SET is_active = FALSE, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("SOP {id}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_sop_id_format() {
        assert_eq!(format_root_sop_id(1), "SOP-001");
        assert_eq!(format_root_sop_id(42), "SOP-042");
        assert_eq!(format_root_sop_id(1000), "SOP-1000");
    }

    #[test]
    fn test_child_sop_id_format() {
        assert_eq!(format_child_sop_id("SOP-001", 1), "SOP-001-#01");
        assert_eq!(format_child_sop_id("SOP-001-#01", 2), "SOP-001-#01-#02");
    }

    #[test]
    fn test_sop_id_matches_contract() {
        let re = regex::Regex::new(r"^SOP-\d{3}(-#\d{2})*$").unwrap();
        assert!(re.is_match(&format_root_sop_id(7)));
        assert!(re.is_match(&format_child_sop_id("SOP-007", 3)));
        assert!(re.is_match(&format_child_sop_id("SOP-007-#03", 1)));
        assert!(!re.is_match("SOP-7"));
    }
}
