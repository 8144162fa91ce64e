//! Excel report export
//!
//! GET /api/reports/export?templateId=
//!
//! The workbook's fixed columns cover the gap lifecycle; choosing a form
//! template appends one column per schema field, filled from each gap's
//! captured form responses. Rows honor the caller's read scope.

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Router};
use rust_xlsxwriter::{Format, Workbook};
use serde::Deserialize;
use serde_json::Value;

use crate::auth::middleware::CurrentUser;
use crate::auth::rbac;
use crate::error::{AppError, AppResult};
use crate::models::Gap;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportQuery {
    pub template_id: Option<i64>,
}

const BASE_COLUMNS: &[&str] = &[
    "Gap ID",
    "Title",
    "Status",
    "Priority",
    "Severity",
    "Department",
    "Reporter ID",
    "Assignee ID",
    "Created At",
    "TAT Deadline",
    "Resolved At",
    "Resolution Summary",
];

/// Extract (key, label) pairs from an opaque form template schema.
///
/// The builder stores fields as an array under `fields`, each object
/// carrying some of `key`/`name`/`id` plus an optional `label`. Unknown
/// shapes degrade to no dynamic columns rather than failing the export.
pub fn schema_fields(schema: &Value) -> Vec<(String, String)> {
    let Some(fields) = schema.get("fields").and_then(|f| f.as_array()) else {
        return Vec::new();
    };

    fields
        .iter()
        .filter_map(|field| {
            let key = field
                .get("key")
                .or_else(|| field.get("name"))
                .or_else(|| field.get("id"))?
                .as_str()?
                .to_string();
            let label = field
                .get("label")
                .and_then(|l| l.as_str())
                .unwrap_or(&key)
                .to_string();
            Some((key, label))
        })
        .collect()
}

/// Render one form response cell as text.
fn response_text(responses: Option<&Value>, key: &str) -> String {
    let Some(value) = responses.and_then(|r| r.get(key)) else {
        return String::new();
    };
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn optional_time(value: Option<chrono::DateTime<chrono::Utc>>) -> String {
    value.map(|t| t.to_rfc3339()).unwrap_or_default()
}

/// Build the workbook bytes for the given gaps and dynamic columns.
pub fn build_workbook(
    gaps: &[Gap],
    dynamic_columns: &[(String, String)],
    template_id: Option<i64>,
) -> AppResult<Vec<u8>> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    let header_format = Format::new().set_bold();

    let mut col: u16 = 0;
    for title in BASE_COLUMNS {
        worksheet
            .write_string_with_format(0, col, *title, &header_format)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("workbook write failed: {e}")))?;
        col += 1;
    }
    for (_, label) in dynamic_columns {
        worksheet
            .write_string_with_format(0, col, label, &header_format)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("workbook write failed: {e}")))?;
        col += 1;
    }

    for (index, gap) in gaps.iter().enumerate() {
        let row = (index + 1) as u32;
        let cells = [
            gap.gap_id.clone(),
            gap.title.clone(),
            format!("{:?}", gap.status),
            format!("{:?}", gap.priority),
            gap.severity.clone().unwrap_or_default(),
            gap.department.clone().unwrap_or_default(),
            gap.reporter_id.to_string(),
            gap.assigned_to_id.map(|id| id.to_string()).unwrap_or_default(),
            gap.created_at.to_rfc3339(),
            optional_time(gap.tat_deadline),
            optional_time(gap.resolved_at),
            gap.resolution_summary.clone().unwrap_or_default(),
        ];

        let mut col: u16 = 0;
        for cell in &cells {
            worksheet
                .write_string(row, col, cell)
                .map_err(|e| AppError::Internal(anyhow::anyhow!("workbook write failed: {e}")))?;
            col += 1;
        }

        // Dynamic cells only for gaps captured against the chosen template.
        let uses_template = template_id.is_some() && gap.form_template_id == template_id;
        for (key, _) in dynamic_columns {
            let text = if uses_template {
                response_text(gap.form_responses.as_ref(), key)
            } else {
                String::new()
            };
            worksheet
                .write_string(row, col, &text)
                .map_err(|e| AppError::Internal(anyhow::anyhow!("workbook write failed: {e}")))?;
            col += 1;
        }
    }

    workbook
        .save_to_buffer()
        .map_err(|e| AppError::Internal(anyhow::anyhow!("workbook serialization failed: {e}")))
}

async fn export_report(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Query(query): Query<ExportQuery>,
) -> AppResult<Response> {
    let dynamic_columns = match query.template_id {
        Some(template_id) => {
            let template = state.form_templates().get(template_id).await?;
            schema_fields(&template.schema)
        }
        None => Vec::new(),
    };

    let scope = rbac::read_scope(current.user());
    let gaps = state.gaps().filtered(scope, None).await?;

    let bytes = build_workbook(&gaps, &dynamic_columns, query.template_id)?;

    let response = (
        [
            (
                header::CONTENT_TYPE,
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet".to_string(),
            ),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"gap-report.xlsx\"".to_string(),
            ),
        ],
        bytes,
    )
        .into_response();
    Ok(response)
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/reports/export", get(export_report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schema_fields_standard_shape() {
        let schema = json!({
            "fields": [
                { "key": "region", "label": "Region" },
                { "name": "impact" },
                { "id": "owner", "label": "Process Owner" }
            ]
        });
        assert_eq!(
            schema_fields(&schema),
            vec![
                ("region".to_string(), "Region".to_string()),
                ("impact".to_string(), "impact".to_string()),
                ("owner".to_string(), "Process Owner".to_string()),
            ]
        );
    }

    #[test]
    fn test_schema_fields_unknown_shape_degrades() {
        assert!(schema_fields(&json!({ "sections": [] })).is_empty());
        assert!(schema_fields(&json!("not an object")).is_empty());
        assert!(schema_fields(&json!({ "fields": [{ "label": "no key" }] })).is_empty());
    }

    #[test]
    fn test_response_text_shapes() {
        let responses = json!({ "region": "EMEA", "count": 4, "flag": true });
        assert_eq!(response_text(Some(&responses), "region"), "EMEA");
        assert_eq!(response_text(Some(&responses), "count"), "4");
        assert_eq!(response_text(Some(&responses), "flag"), "true");
        assert_eq!(response_text(Some(&responses), "missing"), "");
        assert_eq!(response_text(None, "region"), "");
    }
}
