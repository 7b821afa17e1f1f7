use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;

use super::query_params;
use crate::models::RefundStatus;
use crate::state::AppState;
use crate::utils::response::success;
use crate::utils::{AppError, AppResult};

#[derive(Debug, Deserialize)]
pub struct RefundListQuery {
    pub status: Option<String>,
}

pub async fn list_refund_requests(
    State(state): State<AppState>,
    query: Result<Query<RefundListQuery>, QueryRejection>,
) -> AppResult<Response> {
    let query = query_params(query)?;
    let status = query
        .status
        .as_deref()
        .map(str::parse::<RefundStatus>)
        .transpose()
        .map_err(AppError::ValidationError)?;
    let requests = state.reconciler.list_refund_requests(status).await?;
    Ok(success(requests, "Refund requests retrieved"))
}
