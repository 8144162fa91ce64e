//! User directory routes
//!
//! - GET /api/users  (Admin/Management; sanitized projections)

use axum::extract::State;
use axum::routing::get;
use axum::{Extension, Json, Router};

use crate::auth::middleware::CurrentUser;
use crate::auth::rbac;
use crate::error::AppResult;
use crate::models::{PublicUser, UserRole};
use crate::state::AppState;

async fn list_users(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> AppResult<Json<Vec<PublicUser>>> {
    rbac::require_role(
        current.user(),
        &[UserRole::Admin, UserRole::Management],
    )?;
    let users = state.users().list_all().await?;
    Ok(Json(users.iter().map(PublicUser::from).collect()))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/users", get(list_users))
}
