//! Application error kinds and their HTTP mapping
//!
//! Every operation in the service returns a typed error; the axum boundary
//! maps each kind onto a status code and a `{ "error": ... }` JSON body.
//! External-service failures (AI provider, SMTP relay) are swallowed on
//! background paths and never reach this mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Error response body returned by every failing endpoint
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Typed application error
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Malformed input or missing required field
    #[error("{0}")]
    Invalid(String),

    /// Missing or expired session
    #[error("authentication required")]
    Unauthenticated,

    /// Role or ownership predicate failed
    #[error("{0}")]
    Forbidden(String),

    /// Target entity absent
    #[error("{0} not found")]
    NotFound(String),

    /// Uniqueness or concurrent transition clash
    #[error("{0}")]
    Conflict(String),

    /// File or zip limits exceeded
    #[error("{0}")]
    PayloadTooLarge(String),

    /// Unexpected failure; the message is kept opaque at the boundary
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Invalid(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("record".to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::Conflict("record already exists".to_string())
            }
            other => Self::Internal(other.into()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Internal errors carry context (queries, provider payloads) that must
        // not leak to the caller; the full chain goes to the log instead.
        let message = match &self {
            Self::Internal(err) => {
                tracing::error!(error = %err, "request failed");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(ErrorBody { error: message })).into_response()
    }
}

/// Result alias used throughout the service layer
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::invalid("bad").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Unauthenticated.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::forbidden("no").status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::not_found("gap").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(AppError::conflict("dup").status_code(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::PayloadTooLarge("too big".into()).status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }

    #[test]
    fn test_not_found_message() {
        let err = AppError::not_found("gap GAP-0042");
        assert_eq!(err.to_string(), "gap GAP-0042 not found");
    }

    #[test]
    fn test_row_not_found_translation() {
        let err: AppError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
