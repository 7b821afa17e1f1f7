//! Payment provider adapters.
//!
//! Each provider speaks its own protocol; the reconciler only sees
//! [`PaymentGateway`]. Adapters never mutate tickets, they report what the
//! provider said and the caller decides what to persist.

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::models::{PaymentMethod, Ticket};
use crate::utils::AppError;

pub mod cybersource;
pub mod qpay;

pub use cybersource::CyberSourceGateway;
pub use qpay::QPayGateway;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Transport failure or timeout. Retryable; nothing changed locally.
    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    /// The provider understood the request and declined it.
    #[error("refused by provider ({code}): {message}")]
    Refused { code: String, message: String },

    #[error("ticket has no provider transaction reference")]
    MissingReference,

    #[error("unreadable provider response: {0}")]
    InvalidResponse(String),

    #[error("gateway misconfigured: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GatewayError::Unavailable("request timed out".to_string())
        } else {
            GatewayError::Unavailable(e.without_url().to_string())
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Unavailable(msg) | GatewayError::InvalidResponse(msg) => {
                AppError::GatewayUnavailable(msg)
            }
            GatewayError::Refused { message, .. } => AppError::RefundFailed(message),
            GatewayError::MissingReference => AppError::ValidationError(
                "Ticket has no payment reference from the provider".to_string(),
            ),
            GatewayError::Configuration(msg) => AppError::InternalServerError(msg),
        }
    }
}

/// What the client needs to hand the buyer over to the provider.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInitiation {
    pub payment_method: PaymentMethod,
    /// Browser target for form-POST providers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    /// Signed fields to POST to `redirect_url`.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub form_fields: BTreeMap<String, String>,
    /// Token for SDK-driven providers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_token: Option<String>,
    /// Provider correlation id minted for this attempt, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_ref: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InquiryOutcome {
    pub paid: bool,
    pub raw: Value,
}

#[derive(Debug, Clone)]
pub struct RefundOutcome {
    pub refund_ref: String,
    pub raw: Value,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn method(&self) -> PaymentMethod;

    async fn initiate(&self, ticket: &Ticket) -> Result<PaymentInitiation, GatewayError>;

    async fn inquire(&self, ticket: &Ticket) -> Result<InquiryOutcome, GatewayError>;

    /// Fresh correlation id for a refund attempt.
    fn new_refund_reference(&self) -> String;

    /// Submits a refund. `reference` must be reused when retrying the same attempt.
    async fn refund(
        &self,
        ticket: &Ticket,
        amount: Decimal,
        reference: &str,
    ) -> Result<RefundOutcome, GatewayError>;
}

/// Adapters keyed by the payment method they serve.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: HashMap<PaymentMethod, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateways.insert(gateway.method(), gateway);
        self
    }

    pub fn get(&self, method: PaymentMethod) -> Result<Arc<dyn PaymentGateway>, AppError> {
        self.gateways.get(&method).cloned().ok_or_else(|| {
            AppError::ValidationError(format!("No payment gateway configured for {method}"))
        })
    }

    pub fn methods(&self) -> Vec<PaymentMethod> {
        self.gateways.keys().copied().collect()
    }
}

/// Amount in minor currency units, rounded half away from zero.
pub fn minor_units(amount: Decimal) -> Result<i64, GatewayError> {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| GatewayError::InvalidResponse(format!("amount {amount} out of range")))
}

/// Bounds a provider call. Expiry is reported as [`GatewayError::Unavailable`].
pub async fn bounded<T, F>(timeout: Duration, call: F) -> Result<T, GatewayError>
where
    F: Future<Output = Result<T, GatewayError>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| GatewayError::Unavailable("provider call timed out".to_string()))?
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, GatewayError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .build()
        .map_err(|e| GatewayError::Configuration(format!("http client: {e}")))
}
