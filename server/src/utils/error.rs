use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{error, warn};

use crate::store::StoreError;
use crate::utils::response::error as error_response;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid coupon: {0}")]
    InvalidCoupon(String),

    #[error("Coupon expired: {0}")]
    CouponExpired(String),

    #[error("Coupon limit exceeded: {0}")]
    CouponLimitExceeded(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Already requested: {0}")]
    AlreadyRequested(String),

    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Refund failed: {0}")]
    RefundFailed(String),

    /// A provider-side effect succeeded but the local write did not; needs
    /// manual reconciliation.
    #[error("Persistence failure after provider side effect: {0}")]
    PersistenceFailure(String),

    #[error("Database error")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Internal server error")]
    InternalServerError(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_)
            | AppError::InvalidCoupon(_)
            | AppError::CouponExpired(_)
            | AppError::CouponLimitExceeded(_)
            | AppError::InvalidState(_)
            | AppError::RefundFailed(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::AlreadyRequested(_) => StatusCode::CONFLICT,
            AppError::GatewayUnavailable(_) => StatusCode::BAD_GATEWAY,
            AppError::PersistenceFailure(_)
            | AppError::DatabaseError(_)
            | AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::InvalidCoupon(_) => "INVALID_COUPON",
            AppError::CouponExpired(_) => "COUPON_EXPIRED",
            AppError::CouponLimitExceeded(_) => "COUPON_LIMIT_EXCEEDED",
            AppError::InvalidState(_) => "INVALID_STATE",
            AppError::AlreadyRequested(_) => "ALREADY_REQUESTED",
            AppError::GatewayUnavailable(_) => "GATEWAY_UNAVAILABLE",
            AppError::RefundFailed(_) => "REFUND_FAILED",
            AppError::PersistenceFailure(_) => "PERSISTENCE_FAILURE",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    fn log(&self) {
        match self {
            AppError::ValidationError(msg)
            | AppError::NotFound(msg)
            | AppError::InvalidCoupon(msg)
            | AppError::CouponExpired(msg)
            | AppError::CouponLimitExceeded(msg)
            | AppError::InvalidState(msg)
            | AppError::AlreadyRequested(msg)
            | AppError::RefundFailed(msg) => {
                warn!(code = self.code(), message = %msg, "Request refused");
            }
            AppError::GatewayUnavailable(msg) | AppError::InternalServerError(msg) => {
                error!(error = ?self, message = %msg, "Application error");
            }
            AppError::PersistenceFailure(msg) => {
                error!(
                    message = %msg,
                    "Provider and local state out of sync, manual reconciliation required"
                );
            }
            AppError::DatabaseError(e) => {
                error!(error = ?e, "Database error");
            }
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Database(e) => AppError::DatabaseError(e),
            StoreError::Conflict(msg) | StoreError::OutOfRange(msg) => {
                AppError::ValidationError(msg)
            }
            StoreError::CouponLimitReached => {
                AppError::CouponLimitExceeded("Coupon usage limit reached".to_string())
            }
            StoreError::OpenRefundExists => {
                AppError::AlreadyRequested("A refund has already been requested".to_string())
            }
            StoreError::StatusChanged { expected, actual } => AppError::InvalidState(format!(
                "Ticket payment status changed from {expected} to {actual}"
            )),
            StoreError::IllegalTransition { from, to } => {
                AppError::InvalidState(format!("Payment status cannot move from {from} to {to}"))
            }
            StoreError::Corrupt(msg) => AppError::InternalServerError(msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        self.log();

        // Transport and storage details stay in the logs
        let public_message = match &self {
            AppError::ValidationError(msg)
            | AppError::NotFound(msg)
            | AppError::InvalidCoupon(msg)
            | AppError::CouponExpired(msg)
            | AppError::CouponLimitExceeded(msg)
            | AppError::InvalidState(msg)
            | AppError::AlreadyRequested(msg)
            | AppError::RefundFailed(msg) => msg.clone(),
            AppError::GatewayUnavailable(_) => {
                "The payment provider could not be reached".to_string()
            }
            AppError::PersistenceFailure(_) => {
                "The payment provider accepted the request but it could not be recorded; \
                 an operator must reconcile it"
                    .to_string()
            }
            AppError::DatabaseError(_) => "A database error occurred".to_string(),
            AppError::InternalServerError(_) => "An internal error occurred".to_string(),
        };

        error_response(code, public_message, None, status)
    }
}
