use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Json, Path, Query};
use axum::response::Response;
use serde::Serialize;

use crate::utils::response::success;
use crate::utils::{AppError, AppResult};

pub mod coupons;
pub mod refunds;
pub mod tickets;

#[derive(Serialize)]
struct HealthPayload {
    status: &'static str,
    service: &'static str,
}

pub async fn health_check() -> Response {
    let payload = HealthPayload {
        status: "ok",
        service: "tour-booking-api",
    };

    success(payload, "Health check successful")
}

/// Unwraps an extracted JSON body, reporting malformed input in the error envelope.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> AppResult<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| AppError::ValidationError(e.body_text()))
}

pub(crate) fn path_param<T>(param: Result<Path<T>, PathRejection>) -> AppResult<T> {
    param
        .map(|Path(value)| value)
        .map_err(|e| AppError::ValidationError(e.body_text()))
}

pub(crate) fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> AppResult<T> {
    query
        .map(|Query(value)| value)
        .map_err(|e| AppError::ValidationError(e.body_text()))
}
