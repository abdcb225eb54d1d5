use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use razorpay_client::GatewayError;
use resilience::PolicyError;
use thiserror::Error;

pub mod cli;
pub mod db;
pub mod invoice;
pub mod logger;
pub mod payment;
pub mod payout;
pub mod reconciler;
pub mod routes;
pub mod schema;
pub mod settings;

/// Domain error taxonomy for the payment service. Only `routes` translates
/// these into transport codes.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("{0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("duplicate: {0}")]
    Duplicate(String),
    #[error(transparent)]
    Gateway(GatewayError),
    #[error("circuit open for {0}")]
    CircuitOpen(String),
    #[error("inconsistent state: {0}")]
    InconsistentState(String),
    #[error("not implemented: {0}")]
    NotImplemented(String),
    #[error(transparent)]
    Database(#[from] diesel::result::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<PolicyError<GatewayError>> for PaymentError {
    fn from(error: PolicyError<GatewayError>) -> Self {
        match error {
            PolicyError::CircuitOpen(policy) => PaymentError::CircuitOpen(policy),
            PolicyError::Inner(gateway) => PaymentError::Gateway(gateway),
        }
    }
}

pub enum AppError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    NotImplemented(String),
    BadGateway(String),
    ServiceUnavailable(String),
    InternalServerError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::NotImplemented(msg) => (StatusCode::NOT_IMPLEMENTED, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, message).into_response()
    }
}

impl From<PaymentError> for AppError {
    fn from(error: PaymentError) -> Self {
        match error {
            PaymentError::Validation(msg) => AppError::BadRequest(msg),
            PaymentError::NotFound(what) => AppError::NotFound(format!("{what} not found")),
            PaymentError::Duplicate(msg) => AppError::Conflict(msg),
            PaymentError::NotImplemented(msg) => AppError::NotImplemented(msg),
            PaymentError::CircuitOpen(policy) => {
                AppError::ServiceUnavailable(format!("gateway circuit open: {policy}"))
            }
            PaymentError::Gateway(e) => AppError::BadGateway(format!("{e}")),
            PaymentError::InconsistentState(msg) => AppError::Conflict(msg),
            PaymentError::Database(e) => AppError::InternalServerError(format!("{e}")),
            PaymentError::Internal(e) => AppError::InternalServerError(format!("{e:#}")),
        }
    }
}
