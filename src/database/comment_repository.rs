//! Comment persistence
//!
//! Comments are immutable after creation; the only mutation is the
//! administrative delete.

use serde_json::Value;
use sqlx::PgPool;

use crate::error::{AppError, AppResult};
use crate::models::Comment;

pub struct CommentRepository {
    pool: PgPool,
}

impl CommentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        gap_id: i64,
        author_id: i64,
        body: &str,
        attachments: &Value,
    ) -> AppResult<Comment> {
        let comment = sqlx::query_as::<_, Comment>(
            r#"
            INSERT INTO comments (gap_id, author_id, body, attachments)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(gap_id)
        .bind(author_id)
        .bind(body)
        .bind(attachments)
        .fetch_one(&self.pool)
        .await?;
        Ok(comment)
    }

    pub async fn list_for_gap(&self, gap_id: i64) -> AppResult<Vec<Comment>> {
        let comments = sqlx::query_as::<_, Comment>(
            "SELECT * FROM comments WHERE gap_id = $1 ORDER BY created_at",
        )
        .bind(gap_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(comments)
    }

    pub async fn find(&self, id: i64) -> AppResult<Option<Comment>> {
        let comment = sqlx::query_as::<_, Comment>("SELECT * FROM comments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(comment)
    }

    pub async fn delete(&self, id: i64) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM comments WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("comment {id}")));
        }
        Ok(())
    }
}
