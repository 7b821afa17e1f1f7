use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Json, Path, Query, State};
use axum::response::Response;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use super::{json_body, path_param, query_params};
use crate::models::{CouponStatus, NewCoupon};
use crate::services::{coupons, pricing};
use crate::state::AppState;
use crate::utils::response::{created, empty_success, success};
use crate::utils::{AppError, AppResult};

pub async fn apply_discount(
    State(state): State<AppState>,
    payload: Result<Json<pricing::PriceQuoteRequest>, JsonRejection>,
) -> AppResult<Response> {
    let request = json_body(payload)?;
    let breakdown =
        pricing::compute_price(state.store.as_ref(), &request, state.add_on_policy, Utc::now())
            .await?;
    Ok(success(breakdown, "Coupon applied"))
}

pub async fn create_coupons(
    State(state): State<AppState>,
    payload: Result<Json<NewCoupon>, JsonRejection>,
) -> AppResult<Response> {
    let new = json_body(payload)?;
    let coupons = coupons::create_coupons(state.store.as_ref(), new, Utc::now()).await?;
    Ok(created(coupons, "Coupons created"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponListQuery {
    pub catalog_item_id: Option<Uuid>,
}

pub async fn list_coupons(
    State(state): State<AppState>,
    query: Result<Query<CouponListQuery>, QueryRejection>,
) -> AppResult<Response> {
    let query = query_params(query)?;
    let coupons = coupons::list_coupons(state.store.as_ref(), query.catalog_item_id).await?;
    Ok(success(coupons, "Coupons retrieved"))
}

#[derive(Debug, Deserialize)]
pub struct CouponStatusBody {
    pub status: String,
}

pub async fn set_coupon_status(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<CouponStatusBody>, JsonRejection>,
) -> AppResult<Response> {
    let id = path_param(id)?;
    let body = json_body(payload)?;
    let status: CouponStatus = body.status.parse().map_err(AppError::ValidationError)?;
    let coupon = coupons::set_coupon_status(state.store.as_ref(), id, status, Utc::now()).await?;
    Ok(success(coupon, "Coupon status updated"))
}

pub async fn delete_coupon(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> AppResult<Response> {
    let id = path_param(id)?;
    coupons::delete_coupon(state.store.as_ref(), id).await?;
    Ok(empty_success("Coupon deleted"))
}
