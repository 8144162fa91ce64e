//! Gap API routes
//!
//! - POST   /api/gaps
//! - GET    /api/gaps?status=
//! - GET    /api/gaps/:id
//! - PATCH  /api/gaps/:id
//! - POST   /api/gaps/:id/assign | /resolve | /reopen | /mark-duplicate
//! - GET    /api/gaps/:id/similar
//! - GET    /api/gaps/:id/resolution-history
//! - GET    /api/gaps/:id/timeline
//! - GET    /api/gaps/:id/comments, POST /api/gaps/:id/comments
//! - DELETE /api/comments/:id
//! - GET    /api/gaps/:id/pocs, POST /api/gaps/:id/pocs,
//!   POST   /api/gaps/:id/pocs/:user_id/primary,
//!   DELETE /api/gaps/:id/pocs/:user_id
//! - POST   /api/gaps/:id/extensions

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::middleware::CurrentUser;
use crate::auth::rbac;
use crate::error::AppResult;
use crate::gaps::service::{
    AssignInput, CreateGapInput, ExtensionInput, GapPatch, ResolveInput,
};
use crate::gaps::timeline::{self, TimelineEntry};
use crate::models::{
    Comment, Gap, GapPoc, GapStatus, PublicUser, ResolutionHistoryEntry, TatExtension, UserRole,
};
use crate::state::AppState;

// ============================================================================
// Query and response types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct GapListQuery {
    pub status: Option<GapStatus>,
}

/// Roster entry joined with its sanitized user
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PocView {
    #[serde(flatten)]
    pub poc: GapPoc,
    pub user: Option<PublicUser>,
}

/// Gap detail: the row plus sanitized reporter, assignee, and roster
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GapDetail {
    #[serde(flatten)]
    pub gap: Gap,
    pub reporter: Option<PublicUser>,
    pub assignee: Option<PublicUser>,
    pub pocs: Vec<PocView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarGapView {
    pub gap: Gap,
    pub score: i32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkDuplicateRequest {
    pub original_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCommentRequest {
    pub body: String,
    #[serde(default)]
    pub attachments: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddPocRequest {
    pub user_id: i64,
    #[serde(default)]
    pub is_primary: bool,
}

// ============================================================================
// Gap CRUD
// ============================================================================

/// POST /api/gaps — returns immediately; AI fields populate asynchronously
async fn create_gap(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(input): Json<CreateGapInput>,
) -> AppResult<(StatusCode, Json<Gap>)> {
    let gap = state.gap_service().create(current.user(), input).await?;
    Ok((StatusCode::CREATED, Json(gap)))
}

/// GET /api/gaps — list within the caller's read scope
async fn list_gaps(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Query(query): Query<GapListQuery>,
) -> AppResult<Json<Vec<Gap>>> {
    let scope = rbac::read_scope(current.user());
    let gaps = state.gaps().filtered(scope, query.status).await?;
    Ok(Json(gaps))
}

/// GET /api/gaps/:id
async fn get_gap(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> AppResult<Json<GapDetail>> {
    let gap = state.gaps().get(id).await?;
    rbac::ensure_can_read_gap(current.user(), &gap, &state.pocs()).await?;

    let users = state.users();
    let reporter = users
        .find_by_id(gap.reporter_id)
        .await?
        .map(|u| PublicUser::from(&u));
    let assignee = match gap.assigned_to_id {
        Some(assignee_id) => users
            .find_by_id(assignee_id)
            .await?
            .map(|u| PublicUser::from(&u)),
        None => None,
    };

    let roster = state.pocs().list_for_gap(id).await?;
    let roster_users = users
        .get_many(&roster.iter().map(|p| p.user_id).collect::<Vec<_>>())
        .await?;
    let pocs = roster
        .into_iter()
        .map(|poc| {
            let user = roster_users
                .iter()
                .find(|u| u.id == poc.user_id)
                .map(PublicUser::from);
            PocView { poc, user }
        })
        .collect();

    Ok(Json(GapDetail {
        gap,
        reporter,
        assignee,
        pocs,
    }))
}

/// PATCH /api/gaps/:id
async fn update_gap(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(patch): Json<GapPatch>,
) -> AppResult<Json<Gap>> {
    let gap = state.gap_service().update(current.user(), id, patch).await?;
    Ok(Json(gap))
}

// ============================================================================
// Transitions
// ============================================================================

async fn assign_gap(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(input): Json<AssignInput>,
) -> AppResult<Json<Gap>> {
    let gap = state.gap_service().assign(current.user(), id, input).await?;
    Ok(Json(gap))
}

async fn resolve_gap(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(input): Json<ResolveInput>,
) -> AppResult<Json<Gap>> {
    let gap = state.gap_service().resolve(current.user(), id, input).await?;
    Ok(Json(gap))
}

async fn reopen_gap(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> AppResult<Json<Gap>> {
    let gap = state.gap_service().reopen(current.user(), id).await?;
    Ok(Json(gap))
}

async fn mark_duplicate(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(request): Json<MarkDuplicateRequest>,
) -> AppResult<Json<Gap>> {
    let gap = state
        .gap_service()
        .mark_duplicate(current.user(), id, request.original_id)
        .await?;
    Ok(Json(gap))
}

// ============================================================================
// Derived reads
// ============================================================================

/// GET /api/gaps/:id/similar — cached similarity neighbors with scores
async fn similar_gaps(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> AppResult<Json<Vec<SimilarGapView>>> {
    let gap = state.gaps().get(id).await?;
    rbac::ensure_can_read_gap(current.user(), &gap, &state.pocs()).await?;

    let edges = state.similarity().list_for_gap(id).await?;
    let neighbor_ids: Vec<i64> = edges.iter().map(|e| e.similar_gap_id).collect();
    let neighbors = state.gaps().get_many(&neighbor_ids).await?;

    let views = edges
        .into_iter()
        .filter_map(|edge| {
            neighbors
                .iter()
                .find(|g| g.id == edge.similar_gap_id)
                .cloned()
                .map(|gap| SimilarGapView {
                    gap,
                    score: edge.score,
                })
        })
        .collect();

    Ok(Json(views))
}

async fn resolution_history(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> AppResult<Json<Vec<ResolutionHistoryEntry>>> {
    let gap = state.gaps().get(id).await?;
    rbac::ensure_can_read_gap(current.user(), &gap, &state.pocs()).await?;

    let history = state.history().list_for_gap(id).await?;
    Ok(Json(history))
}

/// GET /api/gaps/:id/timeline — merged lifecycle view
async fn gap_timeline(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> AppResult<Json<Vec<TimelineEntry>>> {
    let gap = state.gaps().get(id).await?;
    rbac::ensure_can_read_gap(current.user(), &gap, &state.pocs()).await?;

    let history = state.history().list_for_gap(id).await?;
    let audit = state.audit.list_for_entity("gaps", &id.to_string()).await?;

    Ok(Json(timeline::synthesize(&gap, &history, &audit)))
}

// ============================================================================
// Comments
// ============================================================================

async fn list_comments(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> AppResult<Json<Vec<Comment>>> {
    let gap = state.gaps().get(id).await?;
    rbac::ensure_can_read_gap(current.user(), &gap, &state.pocs()).await?;

    let comments = state.comments().list_for_gap(id).await?;
    Ok(Json(comments))
}

async fn create_comment(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(request): Json<CreateCommentRequest>,
) -> AppResult<(StatusCode, Json<Comment>)> {
    let comment = state
        .gap_service()
        .add_comment(current.user(), id, &request.body, request.attachments)
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

/// DELETE /api/comments/:id — administrative removal only
async fn delete_comment(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> AppResult<Json<serde_json::Value>> {
    rbac::require_role(current.user(), &[UserRole::Admin])?;
    state.comments().delete(id).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

// ============================================================================
// POC roster
// ============================================================================

async fn list_pocs(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> AppResult<Json<Vec<PocView>>> {
    let gap = state.gaps().get(id).await?;
    rbac::ensure_can_read_gap(current.user(), &gap, &state.pocs()).await?;

    let roster = state.pocs().list_for_gap(id).await?;
    let users = state
        .users()
        .get_many(&roster.iter().map(|p| p.user_id).collect::<Vec<_>>())
        .await?;

    let views = roster
        .into_iter()
        .map(|poc| {
            let user = users
                .iter()
                .find(|u| u.id == poc.user_id)
                .map(PublicUser::from);
            PocView { poc, user }
        })
        .collect();
    Ok(Json(views))
}

async fn add_poc(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(request): Json<AddPocRequest>,
) -> AppResult<(StatusCode, Json<GapPoc>)> {
    let poc = state
        .gap_service()
        .add_poc(current.user(), id, request.user_id, request.is_primary)
        .await?;
    Ok((StatusCode::CREATED, Json(poc)))
}

async fn set_primary_poc(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path((id, user_id)): Path<(i64, i64)>,
) -> AppResult<Json<GapPoc>> {
    let poc = state
        .gap_service()
        .set_primary_poc(current.user(), id, user_id)
        .await?;
    Ok(Json(poc))
}

async fn remove_poc(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path((id, user_id)): Path<(i64, i64)>,
) -> AppResult<Json<serde_json::Value>> {
    state
        .gap_service()
        .remove_poc(current.user(), id, user_id)
        .await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

// ============================================================================
// Extensions (request side; review lives in extension_routes)
// ============================================================================

async fn request_extension(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(input): Json<ExtensionInput>,
) -> AppResult<(StatusCode, Json<TatExtension>)> {
    let extension = state
        .gap_service()
        .request_extension(current.user(), id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(extension)))
}

// ============================================================================
// Router
// ============================================================================

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/gaps", post(create_gap).get(list_gaps))
        .route("/api/gaps/:id", get(get_gap).patch(update_gap))
        .route("/api/gaps/:id/assign", post(assign_gap))
        .route("/api/gaps/:id/resolve", post(resolve_gap))
        .route("/api/gaps/:id/reopen", post(reopen_gap))
        .route("/api/gaps/:id/mark-duplicate", post(mark_duplicate))
        .route("/api/gaps/:id/similar", get(similar_gaps))
        .route("/api/gaps/:id/resolution-history", get(resolution_history))
        .route("/api/gaps/:id/timeline", get(gap_timeline))
        .route("/api/gaps/:id/comments", get(list_comments).post(create_comment))
        .route("/api/comments/:id", delete(delete_comment))
        .route("/api/gaps/:id/pocs", get(list_pocs).post(add_poc))
        .route("/api/gaps/:id/pocs/:user_id/primary", post(set_primary_poc))
        .route("/api/gaps/:id/pocs/:user_id", delete(remove_poc))
        .route("/api/gaps/:id/extensions", post(request_extension))
}
