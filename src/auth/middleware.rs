//! Session resolution middleware
//!
//! Resolves the session cookie to a full user record once per request and
//! injects it into the request extensions; every downstream role or
//! ownership check reads that record instead of hitting the session
//! store again.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use tower_sessions::Session;

use crate::error::AppError;
use crate::models::User;
use crate::state::AppState;

/// Session key holding the authenticated user's id
pub const SESSION_USER_KEY: &str = "user_id";

/// The authenticated user, available as a request extension behind
/// `require_session_user`.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Arc<User>);

impl CurrentUser {
    pub fn user(&self) -> &User {
        &self.0
    }
}

/// Middleware guarding every authenticated route. Missing or stale
/// sessions (including sessions whose user has since been deleted)
/// reject with 401 before the handler runs.
pub async fn require_session_user(
    State(state): State<AppState>,
    session: Session,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let user_id: i64 = session
        .get(SESSION_USER_KEY)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("session load failed: {e}")))?
        .ok_or(AppError::Unauthenticated)?;

    let user = state
        .users()
        .find_by_id(user_id)
        .await?
        .ok_or(AppError::Unauthenticated)?;

    request.extensions_mut().insert(CurrentUser(Arc::new(user)));

    Ok(next.run(request).await)
}
