//! TAT extension review routes
//!
//! - GET   /api/extensions?status=
//! - GET   /api/extensions/:id
//! - PATCH /api/extensions/:id   { "decision": "APPROVED" | "REJECTED" }

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde::Deserialize;

use crate::auth::middleware::CurrentUser;
use crate::auth::rbac;
use crate::error::AppResult;
use crate::models::{ExtensionStatus, TatExtension, UserRole};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ExtensionListQuery {
    pub status: Option<ExtensionStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRequest {
    pub decision: ExtensionStatus,
}

/// GET /api/extensions — reviewer listing
async fn list_extensions(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Query(query): Query<ExtensionListQuery>,
) -> AppResult<Json<Vec<TatExtension>>> {
    rbac::require_role(
        current.user(),
        &[UserRole::Admin, UserRole::Management],
    )?;
    let extensions = state.extensions().list(query.status).await?;
    Ok(Json(extensions))
}

/// GET /api/extensions/:id
async fn get_extension(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> AppResult<Json<TatExtension>> {
    rbac::require_role(
        current.user(),
        &[UserRole::Admin, UserRole::Management],
    )?;
    let extension = state.extensions().get(id).await?;
    Ok(Json(extension))
}

/// PATCH /api/extensions/:id — approve or reject; re-decision is 409
async fn decide_extension(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(request): Json<DecisionRequest>,
) -> AppResult<Json<TatExtension>> {
    let extension = state
        .gap_service()
        .review_extension(current.user(), id, request.decision)
        .await?;
    Ok(Json(extension))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/extensions", get(list_extensions))
        .route("/api/extensions/:id", get(get_extension).patch(decide_extension))
}
