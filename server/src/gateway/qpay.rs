//! QPay: flat key-value forms signed with a SHA-256 secure hash.
//!
//! The hash is the hex digest of the merchant secret followed by the field
//! values in a fixed per-operation order. Responses come back form-encoded.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use reqwest::header::CONTENT_TYPE;
use rand::RngCore;
use rust_decimal::Decimal;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    http_client, minor_units, GatewayError, InquiryOutcome, PaymentGateway, PaymentInitiation,
    RefundOutcome,
};
use crate::config::QPayConfig;
use crate::models::{PaymentMethod, Ticket};

const ACTION_PAY: &str = "0";
const ACTION_REFUND: &str = "6";
const ACTION_INQUIRY: &str = "14";

const SECURE_HASH: &str = "SecureHash";
const RESPONSE_SECURE_HASH: &str = "Response.SecureHash";
const RESPONSE_STATUS: &str = "Response.Status";
const RESPONSE_ORIGINAL_STATUS: &str = "Response.OriginalStatus";

const STATUS_SUCCESS: &str = "0000";
const STATUS_REFUND_ACCEPTED: &str = "5002";

pub const PAYMENT_FIELDS: [&str; 12] = [
    "Action",
    "Amount",
    "BankID",
    "CurrencyCode",
    "ExtraFields_f14",
    "Lang",
    "MerchantID",
    "MerchantModuleSessionID",
    "PUN",
    "PaymentDescription",
    "Quantity",
    "TransactionRequestDate",
];

pub const INQUIRY_FIELDS: [&str; 5] = ["Action", "BankID", "Lang", "MerchantID", "OriginalPUN"];

pub const REFUND_FIELDS: [&str; 9] = [
    "Action",
    "Amount_1",
    "BankID",
    "CurrencyCode",
    "Lang",
    "MerchantID",
    "OriginalTransactionPaymentUniqueNumber_1",
    "PUN_1",
    "TransactionRequestDate",
];

/// Human-readable reason for a refund status code.
pub fn refund_status_message(code: &str) -> String {
    let message = match code {
        "5002" => "Refund request accepted.",
        "5003" => "Duplicate refund request.",
        "5004" => "Original transaction not found for refund.",
        "5006" => "Refund currency does not match the original transaction currency.",
        "5007" => "An abnormal error occurred while processing the refund.",
        "5008" => "Refund amount exceeds the original booking amount.",
        "5011" => "The original transaction has a pending chargeback.",
        "5012" => "The original transaction has already been charged back.",
        "5013" => "The original transaction requires a reversal instead of a refund.",
        "5015" => "The original transaction has already been refunded.",
        "5018" => "The original transaction is not a Pay transaction.",
        "5019" => "Payment validation failed.",
        "8107" => "Refund amount must be greater than zero.",
        "8108" => "Currency is not supported.",
        "8200" => "This action is not supported for the merchant.",
        "8201" => "The request IP address is not valid.",
        "8300" => "The payment backend is inactive.",
        "9001" => "An unknown error occurred at the payment backend.",
        other => return format!("Refund failed with status code {other}."),
    };
    message.to_string()
}

/// 20 uppercase hex characters.
pub fn generate_pun() -> String {
    let mut bytes = [0u8; 10];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode_upper(bytes)
}

/// `ddMMyyyyHHmmss` in server local time.
pub fn request_date(now: DateTime<Local>) -> String {
    now.format("%d%m%Y%H%M%S").to_string()
}

pub fn secure_hash<'a>(secret_key: &str, values: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret_key.as_bytes());
    for value in values {
        hasher.update(value.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Builds a request form from `(field, value)` pairs in signing order and attaches the hash.
pub fn sign_fields(
    secret_key: &str,
    order: &[&str],
    values: Vec<String>,
) -> BTreeMap<String, String> {
    let hash = secure_hash(secret_key, values.iter().map(String::as_str));
    let mut form: BTreeMap<String, String> = order
        .iter()
        .map(|k| k.to_string())
        .zip(values)
        .collect();
    form.insert(SECURE_HASH.to_string(), hash);
    form
}

pub fn parse_response(body: &str) -> Result<BTreeMap<String, String>, GatewayError> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(body.trim())
        .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
    if pairs.is_empty() {
        return Err(GatewayError::InvalidResponse("empty response".to_string()));
    }
    Ok(pairs.into_iter().collect())
}

/// Checks `Response.SecureHash` over the other fields in key order.
/// Responses without a hash are accepted as-is.
pub fn verify_response(secret_key: &str, fields: &BTreeMap<String, String>) -> bool {
    let Some(expected) = fields.get(RESPONSE_SECURE_HASH) else {
        return true;
    };
    let actual = secure_hash(
        secret_key,
        fields
            .iter()
            .filter(|(k, _)| k.as_str() != RESPONSE_SECURE_HASH)
            .map(|(_, v)| v.as_str()),
    );
    actual.eq_ignore_ascii_case(expected)
}

fn to_json(fields: &BTreeMap<String, String>) -> Value {
    Value::Object(
        fields
            .iter()
            .filter(|(k, _)| k.as_str() != RESPONSE_SECURE_HASH)
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}

pub struct QPayGateway {
    config: QPayConfig,
    client: reqwest::Client,
}

impl QPayGateway {
    pub fn new(config: QPayConfig, timeout: Duration) -> Result<Self, GatewayError> {
        Ok(Self {
            config,
            client: http_client(timeout)?,
        })
    }

    pub fn payment_form(
        &self,
        ticket: &Ticket,
        pun: &str,
        now: DateTime<Local>,
    ) -> Result<BTreeMap<String, String>, GatewayError> {
        let values = vec![
            ACTION_PAY.to_string(),
            minor_units(ticket.price)?.to_string(),
            self.config.bank_id.clone(),
            self.config.currency_code.clone(),
            self.config.return_url.clone().unwrap_or_default(),
            self.config.lang.clone(),
            self.config.merchant_id.clone(),
            ticket.unique_id.clone(),
            pun.to_string(),
            format!("Booking {}", ticket.unique_id),
            "1".to_string(),
            request_date(now),
        ];
        Ok(sign_fields(&self.config.secret_key, &PAYMENT_FIELDS, values))
    }

    pub fn inquiry_form(&self, original_pun: &str) -> BTreeMap<String, String> {
        let values = vec![
            ACTION_INQUIRY.to_string(),
            self.config.bank_id.clone(),
            self.config.lang.clone(),
            self.config.merchant_id.clone(),
            original_pun.to_string(),
        ];
        sign_fields(&self.config.secret_key, &INQUIRY_FIELDS, values)
    }

    pub fn refund_form(
        &self,
        original_pun: &str,
        amount: Decimal,
        refund_pun: &str,
        now: DateTime<Local>,
    ) -> Result<BTreeMap<String, String>, GatewayError> {
        let values = vec![
            ACTION_REFUND.to_string(),
            minor_units(amount)?.to_string(),
            self.config.bank_id.clone(),
            self.config.currency_code.clone(),
            self.config.lang.clone(),
            self.config.merchant_id.clone(),
            original_pun.to_string(),
            refund_pun.to_string(),
            request_date(now),
        ];
        Ok(sign_fields(&self.config.secret_key, &REFUND_FIELDS, values))
    }

    async fn post(
        &self,
        form: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>, GatewayError> {
        let body = serde_urlencoded::to_string(form)
            .map_err(|e| GatewayError::Configuration(format!("form encoding: {e}")))?;
        let response = self
            .client
            .post(&self.config.api_url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Unavailable(format!(
                "QPay responded with HTTP {status}"
            )));
        }

        let body = response.text().await?;
        let fields = parse_response(&body)?;
        if !verify_response(&self.config.secret_key, &fields) {
            return Err(GatewayError::InvalidResponse(
                "QPay response secure hash mismatch".to_string(),
            ));
        }
        Ok(fields)
    }
}

#[async_trait]
impl PaymentGateway for QPayGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Qpay
    }

    async fn initiate(&self, ticket: &Ticket) -> Result<PaymentInitiation, GatewayError> {
        let pun = generate_pun();
        let form = self.payment_form(ticket, &pun, Local::now())?;
        debug!(ticket = %ticket.unique_id, pun = %pun, "QPay payment form prepared");

        Ok(PaymentInitiation {
            payment_method: PaymentMethod::Qpay,
            redirect_url: Some(self.config.redirect_url.clone()),
            form_fields: form,
            client_token: None,
            provider_ref: Some(pun),
        })
    }

    async fn inquire(&self, ticket: &Ticket) -> Result<InquiryOutcome, GatewayError> {
        let pun = ticket
            .provider_transaction_ref
            .as_deref()
            .ok_or(GatewayError::MissingReference)?;

        let fields = self.post(&self.inquiry_form(pun)).await?;
        let status = fields
            .get(RESPONSE_ORIGINAL_STATUS)
            .or_else(|| fields.get(RESPONSE_STATUS))
            .map(String::as_str)
            .unwrap_or_default();
        let paid = status == STATUS_SUCCESS;

        info!(ticket = %ticket.unique_id, status = %status, paid, "QPay inquiry completed");
        Ok(InquiryOutcome {
            paid,
            raw: to_json(&fields),
        })
    }

    fn new_refund_reference(&self) -> String {
        generate_pun()
    }

    async fn refund(
        &self,
        ticket: &Ticket,
        amount: Decimal,
        reference: &str,
    ) -> Result<RefundOutcome, GatewayError> {
        let original_pun = ticket
            .provider_transaction_ref
            .as_deref()
            .ok_or(GatewayError::MissingReference)?;

        let form = self.refund_form(original_pun, amount, reference, Local::now())?;
        let fields = self.post(&form).await?;
        let code = fields
            .get(RESPONSE_STATUS)
            .cloned()
            .unwrap_or_default();

        if code != STATUS_REFUND_ACCEPTED {
            let message = refund_status_message(&code);
            warn!(ticket = %ticket.unique_id, code = %code, message = %message, "QPay refused refund");
            return Err(GatewayError::Refused { code, message });
        }

        info!(ticket = %ticket.unique_id, refund_pun = %reference, "QPay accepted refund");
        Ok(RefundOutcome {
            refund_ref: reference.to_string(),
            raw: to_json(&fields),
        })
    }
}
