use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Json, Path, State};
use axum::response::Response;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{json_body, path_param};
use crate::models::PaymentStatus;
use crate::services::booking::{self, BookingRequest};
use crate::state::AppState;
use crate::utils::response::{created, success};
use crate::utils::AppResult;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UniqueIdBody {
    pub unique_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketIdBody {
    pub ticket_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCallbackBody {
    pub unique_id: String,
    pub provider_ref: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundBody {
    pub ticket_id: Uuid,
    pub refund_amount: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequestBody {
    pub unique_id: String,
    pub reason: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InquiryPayload {
    found: bool,
    updated_payment_status: PaymentStatus,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefundRequested {
    refund_id: Uuid,
}

pub async fn book_ticket(
    State(state): State<AppState>,
    payload: Result<Json<BookingRequest>, JsonRejection>,
) -> AppResult<Response> {
    let request = json_body(payload)?;
    let ticket = booking::book_ticket(
        state.store.as_ref(),
        &state.gateways,
        request,
        state.add_on_policy,
        Utc::now(),
    )
    .await?;
    Ok(created(ticket, "Ticket booked"))
}

pub async fn get_ticket(
    State(state): State<AppState>,
    unique_id: Result<Path<String>, PathRejection>,
) -> AppResult<Response> {
    let unique_id = path_param(unique_id)?;
    let ticket = booking::get_ticket(state.store.as_ref(), &unique_id).await?;
    Ok(success(ticket, "Ticket retrieved"))
}

pub async fn initiate_payment(
    State(state): State<AppState>,
    payload: Result<Json<UniqueIdBody>, JsonRejection>,
) -> AppResult<Response> {
    let body = json_body(payload)?;
    let initiation = booking::initiate_payment(
        state.store.as_ref(),
        &state.gateways,
        &body.unique_id,
        state.gateway_timeout,
    )
    .await?;
    Ok(success(initiation, "Payment initiated"))
}

pub async fn payment_callback(
    State(state): State<AppState>,
    payload: Result<Json<PaymentCallbackBody>, JsonRejection>,
) -> AppResult<Response> {
    let body = json_body(payload)?;
    let ticket = booking::record_payment_reference(
        state.store.as_ref(),
        &body.unique_id,
        &body.provider_ref,
        Utc::now(),
    )
    .await?;
    Ok(success(ticket, "Payment reference recorded"))
}

pub async fn payment_inquire(
    State(state): State<AppState>,
    payload: Result<Json<UniqueIdBody>, JsonRejection>,
) -> AppResult<Response> {
    let body = json_body(payload)?;
    let report = state.reconciler.inquire_payment(&body.unique_id).await?;
    let message = if report.found {
        "Payment status updated"
    } else {
        "Ticket not found"
    };
    Ok(success(
        InquiryPayload {
            found: report.found,
            updated_payment_status: report.payment_status,
        },
        message,
    ))
}

pub async fn qpay_refund(
    State(state): State<AppState>,
    payload: Result<Json<RefundBody>, JsonRejection>,
) -> AppResult<Response> {
    let body = json_body(payload)?;
    let decision = state
        .reconciler
        .process_refund(body.ticket_id, body.refund_amount)
        .await?;
    Ok(success(decision, "Refund submitted to provider"))
}

pub async fn qpay_refund_request(
    State(state): State<AppState>,
    payload: Result<Json<RefundRequestBody>, JsonRejection>,
) -> AppResult<Response> {
    let body = json_body(payload)?;
    let request = state
        .reconciler
        .request_refund(&body.unique_id, &body.reason)
        .await?;
    Ok(created(
        RefundRequested {
            refund_id: request.id,
        },
        "Refund request submitted",
    ))
}

pub async fn reject_refund(
    State(state): State<AppState>,
    payload: Result<Json<TicketIdBody>, JsonRejection>,
) -> AppResult<Response> {
    let body = json_body(payload)?;
    let decision = state.reconciler.reject_refund_request(body.ticket_id).await?;
    Ok(success(decision, "Refund rejected"))
}

pub async fn complete_refund(
    State(state): State<AppState>,
    payload: Result<Json<TicketIdBody>, JsonRejection>,
) -> AppResult<Response> {
    let body = json_body(payload)?;
    let decision = state.reconciler.complete_refund(body.ticket_id).await?;
    Ok(success(decision, "Refund completed"))
}

pub async fn cancel_ticket(
    State(state): State<AppState>,
    payload: Result<Json<TicketIdBody>, JsonRejection>,
) -> AppResult<Response> {
    let body = json_body(payload)?;
    let ticket = state.reconciler.cancel_ticket(body.ticket_id).await?;
    Ok(success(ticket, "Ticket cancelled"))
}
