//! Form template persistence
//!
//! The schema blob is opaque to the core; only the export path inspects
//! its field list.

use serde_json::Value;
use sqlx::PgPool;

use crate::error::{AppError, AppResult};
use crate::models::FormTemplate;

pub struct FormTemplateRepository {
    pool: PgPool,
}

impl FormTemplateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        name: &str,
        version: &str,
        schema: &Value,
        created_by_id: i64,
    ) -> AppResult<FormTemplate> {
        let template = sqlx::query_as::<_, FormTemplate>(
            r#"
            INSERT INTO form_templates (name, version, schema, created_by_id)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(version)
        .bind(schema)
        .bind(created_by_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(template)
    }

    pub async fn get(&self, id: i64) -> AppResult<FormTemplate> {
        sqlx::query_as::<_, FormTemplate>("SELECT * FROM form_templates WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found(format!("form template {id}")))
    }

    pub async fn list(&self) -> AppResult<Vec<FormTemplate>> {
        let templates = sqlx::query_as::<_, FormTemplate>(
            "SELECT * FROM form_templates ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(templates)
    }
}
