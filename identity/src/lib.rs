use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use thiserror::Error;
use vault_crypto::CryptoError;

pub mod access;
pub mod address;
pub mod cache;
pub mod cli;
pub mod consent;
pub mod db;
pub mod logger;
pub mod routes;
pub mod schema;
pub mod settings;
pub mod user;

/// Domain error taxonomy for the identity service.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("{0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("duplicate: {0}")]
    Duplicate(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("inconsistent state: {0}")]
    InconsistentState(String),
    #[error(transparent)]
    Kms(#[from] CryptoError),
    #[error(transparent)]
    Database(#[from] diesel::result::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub enum AppError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    ServiceUnavailable(String),
    InternalServerError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, message).into_response()
    }
}

impl From<IdentityError> for AppError {
    fn from(error: IdentityError) -> Self {
        match error {
            IdentityError::Validation(msg) => AppError::BadRequest(msg),
            IdentityError::NotFound(what) => AppError::NotFound(format!("{what} not found")),
            IdentityError::Duplicate(msg) => AppError::Conflict(msg),
            IdentityError::PermissionDenied(msg) => AppError::Forbidden(msg),
            IdentityError::InconsistentState(msg) => AppError::Conflict(msg),
            IdentityError::Kms(e) if e.is_unavailable() => {
                AppError::ServiceUnavailable(format!("{e}"))
            }
            IdentityError::Kms(e) => AppError::InternalServerError(format!("{e}")),
            IdentityError::Database(e) => AppError::InternalServerError(format!("{e}")),
            IdentityError::Internal(e) => AppError::InternalServerError(format!("{e:#}")),
        }
    }
}
