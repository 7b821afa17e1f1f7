use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

use crate::config::AddOnPolicy;
use crate::gateway::{bounded, GatewayRegistry, PaymentInitiation};
use crate::models::{
    normalize_email, AddOnSelection, PaymentMethod, PaymentStatus, Ticket, TicketStatus,
};
use crate::services::pricing::{price_order, Party};
use crate::store::{CouponClaim, Store, StoreError};
use crate::utils::{AppError, AppResult};

const UNIQUE_ID_ATTEMPTS: usize = 3;
/// Largest party count the ledger column holds.
const MAX_PARTY_COUNT: u32 = i32::MAX as u32;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    pub catalog_item_id: Uuid,
    pub buyer_email: String,
    #[serde(default)]
    pub adult_count: u32,
    #[serde(default)]
    pub child_count: u32,
    #[serde(default)]
    pub add_ons: Vec<AddOnSelection>,
    pub coupon_code: Option<String>,
    pub payment_method: PaymentMethod,
}

fn new_unique_id() -> String {
    format!("TB{}", hex::encode_upper(rand::random::<[u8; 6]>()))
}

fn validate(request: &BookingRequest) -> AppResult<()> {
    let email = request.buyer_email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::ValidationError(
            "a valid buyerEmail is required".to_string(),
        ));
    }
    for (field, count) in [
        ("adultCount", request.adult_count),
        ("childCount", request.child_count),
    ] {
        if count > MAX_PARTY_COUNT {
            return Err(AppError::ValidationError(format!(
                "{field} must not exceed {MAX_PARTY_COUNT}"
            )));
        }
    }
    if request.adult_count == 0 && request.child_count == 0 {
        return Err(AppError::ValidationError(
            "at least one adult or child is required".to_string(),
        ));
    }
    Ok(())
}

/// Prices and records a booking. Coupon usage is re-checked atomically with the
/// ticket insert, so concurrent bookings cannot overrun the per-buyer limit.
pub async fn book_ticket(
    store: &dyn Store,
    gateways: &GatewayRegistry,
    request: BookingRequest,
    add_on_policy: AddOnPolicy,
    now: DateTime<Utc>,
) -> AppResult<Ticket> {
    validate(&request)?;
    gateways.get(request.payment_method)?;

    let buyer_email = normalize_email(&request.buyer_email);
    let coupon_code = request
        .coupon_code
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());
    let party = Party {
        catalog_item_id: request.catalog_item_id,
        buyer_email: &buyer_email,
        adult_count: request.adult_count,
        child_count: request.child_count,
        add_ons: &request.add_ons,
    };
    let priced = price_order(store, &party, coupon_code, add_on_policy, now).await?;

    let claim = priced.coupon.as_ref().map(|c| CouponClaim {
        coupon_id: c.id,
        usage_limit_per_user: c.usage_limit_per_user,
    });
    let mut ticket = Ticket {
        id: Uuid::new_v4(),
        unique_id: new_unique_id(),
        catalog_item_id: request.catalog_item_id,
        buyer_email,
        adult_count: request.adult_count,
        child_count: request.child_count,
        add_on_selections: request.add_ons,
        coupon_id: priced.coupon.as_ref().map(|c| c.id),
        price: priced.breakdown.discounted_price,
        payment_method: request.payment_method,
        provider_transaction_ref: None,
        refund_provider_ref: None,
        status: TicketStatus::Booked,
        payment_status: PaymentStatus::Pending,
        created_at: now,
        updated_at: now,
    };

    let mut attempt = 1;
    loop {
        match store.insert_ticket(&ticket, claim).await {
            Ok(()) => break,
            Err(StoreError::Conflict(_)) if attempt < UNIQUE_ID_ATTEMPTS => {
                attempt += 1;
                ticket.unique_id = new_unique_id();
            }
            Err(e) => return Err(e.into()),
        }
    }

    tracing::info!(
        ticket = %ticket.unique_id,
        catalog_item_id = %ticket.catalog_item_id,
        price = %ticket.price,
        coupon_id = ?ticket.coupon_id,
        "Ticket booked"
    );
    Ok(ticket)
}

pub async fn get_ticket(store: &dyn Store, unique_id: &str) -> AppResult<Ticket> {
    store
        .get_ticket_by_unique_id(unique_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Ticket {unique_id} not found")))
}

fn ensure_awaiting_payment(ticket: &Ticket) -> AppResult<()> {
    if ticket.status != TicketStatus::Booked || ticket.payment_status != PaymentStatus::Pending {
        return Err(AppError::InvalidState(format!(
            "ticket {} is not awaiting payment (payment status {})",
            ticket.unique_id, ticket.payment_status
        )));
    }
    Ok(())
}

/// Starts the client-side payment flow with the ticket's provider.
pub async fn initiate_payment(
    store: &dyn Store,
    gateways: &GatewayRegistry,
    unique_id: &str,
    timeout: Duration,
) -> AppResult<PaymentInitiation> {
    let ticket = get_ticket(store, unique_id).await?;
    ensure_awaiting_payment(&ticket)?;
    let gateway = gateways.get(ticket.payment_method)?;

    let initiation = bounded(timeout, gateway.initiate(&ticket)).await?;
    tracing::info!(
        ticket = %ticket.unique_id,
        method = %ticket.payment_method,
        "Payment initiated"
    );
    Ok(initiation)
}

/// Stores the provider correlation ref handed back when the buyer returns from
/// the payment page.
pub async fn record_payment_reference(
    store: &dyn Store,
    unique_id: &str,
    provider_ref: &str,
    now: DateTime<Utc>,
) -> AppResult<Ticket> {
    let provider_ref = provider_ref.trim();
    if provider_ref.is_empty() {
        return Err(AppError::ValidationError(
            "providerRef is required".to_string(),
        ));
    }
    let ticket = get_ticket(store, unique_id).await?;
    if ticket.provider_transaction_ref.as_deref() == Some(provider_ref) {
        return Ok(ticket);
    }
    ensure_awaiting_payment(&ticket)?;

    let ticket = store
        .set_provider_transaction_ref(ticket.id, provider_ref, now)
        .await?;
    tracing::info!(ticket = %ticket.unique_id, "Provider reference recorded");
    Ok(ticket)
}
