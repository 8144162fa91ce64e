//! HTTP surface
//!
//! Per-domain route modules assembled into one router. Everything except
//! the health probe and login sits behind the session middleware; every
//! successful authenticated mutation is recorded to the audit log with a
//! path-derived entity reference.

pub mod auth_routes;
pub mod export_routes;
pub mod extension_routes;
pub mod file_routes;
pub mod gap_routes;
pub mod sop_routes;
pub mod user_routes;

use axum::body::Body;
use axum::http::{header, Method, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tower_sessions::service::SignedCookie;
use tower_sessions::SessionManagerLayer;
use tower_sessions_sqlx_store::PostgresStore;

use crate::auth::middleware::{require_session_user, CurrentUser};
use crate::database::audit_repository::AuditRecord;
use crate::realtime::ws_handler;
use crate::state::AppState;

/// GET /api/health
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Map an HTTP method onto the audit action prefix
fn action_verb(method: &Method) -> Option<&'static str> {
    match *method {
        Method::POST => Some("CREATE"),
        Method::PATCH | Method::PUT => Some("UPDATE"),
        Method::DELETE => Some("DELETE"),
        _ => None,
    }
}

/// Derive (entity_type, entity_id) from a request path like
/// `/api/gaps/42/assign` → ("gaps", "42"). Collection routes record the
/// entity id as "-"; the row insert that follows knows the real id.
fn derive_entity(path: &str) -> (String, String) {
    let mut segments = path.trim_start_matches('/').split('/');
    // skip the "api" prefix
    let _ = segments.next();
    let entity_type = segments.next().unwrap_or("unknown").to_string();
    let entity_id = segments
        .next()
        .filter(|s| s.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or("-")
        .to_string();
    (entity_type, entity_id)
}

/// Record every successful authenticated mutation. Best-effort by
/// construction: the repository swallows write failures.
async fn audit_mutations(
    axum::extract::State(state): axum::extract::State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let actor_id = request
        .extensions()
        .get::<CurrentUser>()
        .map(|current| current.user().id);
    let ip_address = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string());
    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let response = next.run(request).await;

    if let Some(verb) = action_verb(&method) {
        if response.status().is_success() {
            let (entity_type, entity_id) = derive_entity(&path);
            state
                .audit
                .record(AuditRecord {
                    actor_id,
                    action: format!("{verb}_{}", entity_type.to_uppercase()),
                    entity_type,
                    entity_id,
                    changes: None,
                    ip_address,
                    user_agent,
                })
                .await;
        }
    }

    response
}

/// Assemble the full application router.
pub fn build_router(
    state: AppState,
    session_layer: SessionManagerLayer<PostgresStore, SignedCookie>,
) -> Router {
    let protected = Router::new()
        .merge(auth_routes::protected_router())
        .merge(user_routes::router())
        .merge(gap_routes::router())
        .merge(extension_routes::router())
        .merge(sop_routes::router())
        .merge(file_routes::router())
        .merge(export_routes::router())
        .route("/api/ws", get(ws_handler))
        .layer(middleware::from_fn_with_state(state.clone(), audit_mutations))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_session_user,
        ));

    Router::new()
        .route("/api/health", get(health))
        .merge(auth_routes::public_router())
        .merge(protected)
        .layer(session_layer)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_entity_with_id() {
        assert_eq!(
            derive_entity("/api/gaps/42/assign"),
            ("gaps".to_string(), "42".to_string())
        );
    }

    #[test]
    fn test_derive_entity_collection() {
        assert_eq!(
            derive_entity("/api/gaps"),
            ("gaps".to_string(), "-".to_string())
        );
    }

    #[test]
    fn test_derive_entity_non_numeric_segment() {
        assert_eq!(
            derive_entity("/api/reports/export"),
            ("reports".to_string(), "-".to_string())
        );
    }

    #[test]
    fn test_action_verbs() {
        assert_eq!(action_verb(&Method::POST), Some("CREATE"));
        assert_eq!(action_verb(&Method::PATCH), Some("UPDATE"));
        assert_eq!(action_verb(&Method::DELETE), Some("DELETE"));
        assert_eq!(action_verb(&Method::GET), None);
    }
}
