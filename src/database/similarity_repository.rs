//! Similarity edge persistence
//!
//! Edges are written in symmetric pairs inside one transaction so a
//! neighbor lookup is a single index probe from either endpoint. The
//! unique index on (gap_id, similar_gap_id) plus the upsert keeps
//! re-enrichment idempotent.

use sqlx::PgPool;

use crate::error::AppResult;
use crate::models::SimilarGap;

pub struct SimilarityRepository {
    pool: PgPool,
}

impl SimilarityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Write both directions of every (gap, neighbor, score) edge.
    pub async fn write_pairs(&self, gap_id: i64, edges: &[(i64, i32)]) -> AppResult<()> {
        if edges.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for (neighbor_id, score) in edges {
            sqlx::query(
                r#"
                INSERT INTO similar_gaps (gap_id, similar_gap_id, score)
                VALUES ($1, $2, $3), ($2, $1, $3)
                ON CONFLICT (gap_id, similar_gap_id)
                DO UPDATE SET score = EXCLUDED.score, created_at = now()
                "#,
            )
            .bind(gap_id)
            .bind(neighbor_id)
            .bind(score)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Neighbors of a gap, highest score first.
    pub async fn list_for_gap(&self, gap_id: i64) -> AppResult<Vec<SimilarGap>> {
        let edges = sqlx::query_as::<_, SimilarGap>(
            "SELECT * FROM similar_gaps WHERE gap_id = $1 ORDER BY score DESC",
        )
        .bind(gap_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(edges)
    }

    /// Drop every edge touching the gap, in either direction. Runs before
    /// a content edit re-enqueues enrichment.
    pub async fn invalidate_for_gap(&self, gap_id: i64) -> AppResult<u64> {
        let result =
            sqlx::query("DELETE FROM similar_gaps WHERE gap_id = $1 OR similar_gap_id = $1")
                .bind(gap_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}
