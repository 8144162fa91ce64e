//! Authentication routes
//!
//! - POST /api/auth/login     (public)
//! - POST /api/auth/logout
//! - POST /api/auth/register  (Admin only)
//! - GET  /api/auth/me

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::Deserialize;
use tower_sessions::Session;

use crate::auth::middleware::{CurrentUser, SESSION_USER_KEY};
use crate::auth::{password, rbac};
use crate::database::user_repository::NewUser;
use crate::error::{AppError, AppResult};
use crate::models::{PublicUser, UserRole};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub employee_id: Option<String>,
    pub display_name: String,
    pub role: UserRole,
    pub department: Option<String>,
    pub password: String,
}

/// POST /api/auth/login
async fn login(
    State(state): State<AppState>,
    session: Session,
    Json(request): Json<LoginRequest>,
) -> AppResult<Json<PublicUser>> {
    let user = state
        .users()
        .find_by_email(&request.email)
        .await?
        .filter(|user| password::verify_password(&request.password, &user.password_hash))
        .ok_or_else(|| AppError::invalid("invalid email or password"))?;

    // Rotate the session id on privilege change.
    session
        .cycle_id()
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("session rotation failed: {e}")))?;
    session
        .insert(SESSION_USER_KEY, user.id)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("session write failed: {e}")))?;

    tracing::info!(user = user.id, "login");
    Ok(Json(PublicUser::from(&user)))
}

/// POST /api/auth/logout
async fn logout(session: Session) -> AppResult<Json<serde_json::Value>> {
    session
        .flush()
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("session flush failed: {e}")))?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// POST /api/auth/register — admin-created accounts only
async fn register(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(request): Json<RegisterRequest>,
) -> AppResult<Json<PublicUser>> {
    rbac::require_role(current.user(), &[UserRole::Admin])?;

    if request.email.trim().is_empty() || !request.email.contains('@') {
        return Err(AppError::invalid("a valid email is required"));
    }
    if request.password.len() < 8 {
        return Err(AppError::invalid("password must be at least 8 characters"));
    }
    if request.display_name.trim().is_empty() {
        return Err(AppError::invalid("a display name is required"));
    }

    let password_hash = password::hash_password(&request.password)?;
    let user = state
        .users()
        .create(NewUser {
            email: request.email,
            employee_id: request.employee_id.filter(|e| !e.trim().is_empty()),
            display_name: request.display_name,
            role: request.role,
            department: request.department,
            password_hash,
        })
        .await?;

    tracing::info!(user = user.id, actor = current.user().id, "user registered");
    Ok(Json(PublicUser::from(&user)))
}

/// GET /api/auth/me
async fn me(Extension(current): Extension<CurrentUser>) -> Json<PublicUser> {
    Json(PublicUser::from(current.user()))
}

/// Routes reachable without a session
pub fn public_router() -> Router<AppState> {
    Router::new().route("/api/auth/login", post(login))
}

/// Routes behind the session middleware
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/register", post(register))
        .route("/api/auth/me", get(me))
}
