use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Domain error taxonomy. Components return these typed; the HTTP layer maps
/// them to status codes in exactly one place (`IntoResponse` below).
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("permission denied")]
    PermissionDenied,

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("upstream unavailable: {0}")]
    Transient(String),

    #[error("push subscription gone for user {0}")]
    DependencyGone(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    pub fn not_found(what: impl Into<String>) -> Self {
        DomainError::NotFound(what.into())
    }

    pub fn invalid_request(why: impl Into<String>) -> Self {
        DomainError::InvalidRequest(why.into())
    }

    pub fn invalid_state(why: impl Into<String>) -> Self {
        DomainError::InvalidState(why.into())
    }

    pub fn constraint(why: impl Into<String>) -> Self {
        DomainError::ConstraintViolation(why.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            DomainError::NotFound(_) => StatusCode::NOT_FOUND,
            DomainError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            DomainError::InvalidState(_) => StatusCode::CONFLICT,
            DomainError::PermissionDenied => StatusCode::FORBIDDEN,
            DomainError::ConstraintViolation(_) => StatusCode::BAD_REQUEST,
            DomainError::Transient(_) => StatusCode::BAD_GATEWAY,
            // A vanished subscription is handled internally; if it ever
            // reaches the surface, the upstream dependency is at fault.
            DomainError::DependencyGone(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for DomainError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
