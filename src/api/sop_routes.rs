//! SOP catalogue routes
//!
//! - GET    /api/sops?includeInactive=
//! - POST   /api/sops                 (Admin/Management)
//! - GET    /api/sops/:id
//! - PATCH  /api/sops/:id             (Admin/Management)
//! - DELETE /api/sops/:id             (Admin/Management; deactivates)

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde::Deserialize;

use crate::auth::middleware::CurrentUser;
use crate::auth::rbac;
use crate::database::sop_repository::{NewSop, SopUpdate};
use crate::error::{AppError, AppResult};
use crate::models::{Sop, UserRole};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SopListQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSopRequest {
    pub title: String,
    pub description: Option<String>,
    pub body: String,
    pub category: Option<String>,
    pub department: Option<String>,
    pub parent_sop_id: Option<i64>,
    pub version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSopRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub body: Option<String>,
    pub category: Option<String>,
    pub department: Option<String>,
    pub parent_sop_id: Option<i64>,
    pub version: Option<String>,
    pub is_active: Option<bool>,
}

async fn list_sops(
    State(state): State<AppState>,
    Query(query): Query<SopListQuery>,
) -> AppResult<Json<Vec<Sop>>> {
    let sops = state.sops().list(query.include_inactive).await?;
    Ok(Json(sops))
}

async fn get_sop(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Sop>> {
    let sop = state.sops().get(id).await?;
    Ok(Json(sop))
}

async fn create_sop(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(request): Json<CreateSopRequest>,
) -> AppResult<(StatusCode, Json<Sop>)> {
    rbac::require_role(
        current.user(),
        &[UserRole::Admin, UserRole::Management],
    )?;

    if request.title.trim().is_empty() || request.body.trim().is_empty() {
        return Err(AppError::invalid("title and body are required"));
    }

    let sop = state
        .sops()
        .create(NewSop {
            title: request.title,
            description: request.description,
            body: request.body,
            category: request.category,
            department: request.department,
            parent_sop_id: request.parent_sop_id,
            version: request.version.unwrap_or_else(|| "1.0".to_string()),
            created_by_id: current.user().id,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(sop)))
}

async fn update_sop(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(request): Json<UpdateSopRequest>,
) -> AppResult<Json<Sop>> {
    rbac::require_role(
        current.user(),
        &[UserRole::Admin, UserRole::Management],
    )?;

    let current_sop = state.sops().get(id).await?;

    let sop = state
        .sops()
        .update(
            id,
            SopUpdate {
                title: request.title.unwrap_or(current_sop.title),
                description: request.description.or(current_sop.description),
                body: request.body.unwrap_or(current_sop.body),
                category: request.category.or(current_sop.category),
                department: request.department.or(current_sop.department),
                parent_sop_id: match request.parent_sop_id {
                    Some(parent) => Some(parent),
                    None => current_sop.parent_sop_id,
                },
                version: request.version.unwrap_or(current_sop.version),
                is_active: request.is_active.unwrap_or(current_sop.is_active),
            },
        )
        .await?;

    Ok(Json(sop))
}

async fn delete_sop(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> AppResult<Json<serde_json::Value>> {
    rbac::require_role(
        current.user(),
        &[UserRole::Admin, UserRole::Management],
    )?;
    state.sops().deactivate(id).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/sops", get(list_sops).post(create_sop))
        .route(
            "/api/sops/:id",
            get(get_sop).patch(update_sop).delete(delete_sop),
        )
}
