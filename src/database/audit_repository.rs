//! Append-only audit log
//!
//! Recording is best-effort: callers go through `record`, which logs and
//! swallows failures so an audit problem never aborts the operation that
//! produced it. Change diffs are redacted before they reach the table.

use serde_json::Value;
use sqlx::PgPool;

use crate::error::AppResult;
use crate::models::AuditLogEntry;

/// Keys whose values are never persisted in a change diff
const SENSITIVE_KEYS: &[&str] = &["password", "password_hash", "token", "secret", "api_key"];

/// Replace sensitive values anywhere in a change diff with `"[REDACTED]"`.
pub fn redact_changes(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let redacted = map
                .iter()
                .map(|(key, val)| {
                    let lowered = key.to_lowercase();
                    if SENSITIVE_KEYS.iter().any(|s| lowered.contains(s)) {
                        (key.clone(), Value::String("[REDACTED]".to_string()))
                    } else {
                        (key.clone(), redact_changes(val))
                    }
                })
                .collect();
            Value::Object(redacted)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_changes).collect()),
        other => other.clone(),
    }
}

/// One mutation to record
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub actor_id: Option<i64>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub changes: Option<Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Clone)]
pub struct AuditRepository {
    pool: PgPool,
}

impl AuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append an audit row, swallowing failures.
    pub async fn record(&self, record: AuditRecord) {
        if let Err(err) = self.insert(&record).await {
            tracing::warn!(
                action = %record.action,
                entity_type = %record.entity_type,
                entity_id = %record.entity_id,
                error = %err,
                "failed to write audit log entry"
            );
        }
    }

    async fn insert(&self, record: &AuditRecord) -> AppResult<()> {
        let changes = record.changes.as_ref().map(redact_changes);

        sqlx::query(
            r#"
            INSERT INTO audit_logs (
                actor_id, action, entity_type, entity_id, changes, ip_address, user_agent
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.actor_id)
        .bind(&record.action)
        .bind(&record.entity_type)
        .bind(&record.entity_id)
        .bind(changes)
        .bind(&record.ip_address)
        .bind(&record.user_agent)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> AppResult<Vec<AuditLogEntry>> {
        let entries = sqlx::query_as::<_, AuditLogEntry>(
            r#"
            SELECT * FROM audit_logs
            WHERE entity_type = $1 AND entity_id = $2
            ORDER BY created_at
            "#,
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_redact_sensitive_keys() {
        let diff = json!({
            "title": "New title",
            "password": "hunter2",
            "nested": { "apiKey": "sk-123", "note": "kept" }
        });
        let redacted = redact_changes(&diff);
        assert_eq!(redacted["title"], "New title");
        assert_eq!(redacted["password"], "[REDACTED]");
        assert_eq!(redacted["nested"]["note"], "kept");
    }

    #[test]
    fn test_redact_case_insensitive() {
        let diff = json!({ "Password": "x", "SESSION_TOKEN": "y" });
        let redacted = redact_changes(&diff);
        assert_eq!(redacted["Password"], "[REDACTED]");
        assert_eq!(redacted["SESSION_TOKEN"], "[REDACTED]");
    }

    #[test]
    fn test_redact_inside_arrays() {
        let diff = json!([{ "token": "abc" }, { "field": "ok" }]);
        let redacted = redact_changes(&diff);
        assert_eq!(redacted[0]["token"], "[REDACTED]");
        assert_eq!(redacted[1]["field"], "ok");
    }
}
