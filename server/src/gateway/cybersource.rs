//! CyberSource REST API with HTTP Signature authentication.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Method, StatusCode};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    http_client, GatewayError, InquiryOutcome, PaymentGateway, PaymentInitiation, RefundOutcome,
};
use crate::config::CyberSourceConfig;
use crate::models::{PaymentMethod, Ticket};

const DECISION_ACCEPT: &str = "ACCEPT";

pub fn digest_header(body: &[u8]) -> String {
    format!("SHA-256={}", B64.encode(Sha256::digest(body)))
}

pub fn http_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Headers covered by the signature, in signing order.
fn signed_header_names(has_body: bool) -> &'static str {
    if has_body {
        "host date (request-target) digest v-c-merchant-id"
    } else {
        "host date (request-target) v-c-merchant-id"
    }
}

pub fn signing_string(
    host: &str,
    date: &str,
    method: &Method,
    path: &str,
    digest: Option<&str>,
    merchant_id: &str,
) -> String {
    let mut lines = vec![
        format!("host: {host}"),
        format!("date: {date}"),
        format!(
            "(request-target): {} {path}",
            method.as_str().to_ascii_lowercase()
        ),
    ];
    if let Some(digest) = digest {
        lines.push(format!("digest: {digest}"));
    }
    lines.push(format!("v-c-merchant-id: {merchant_id}"));
    lines.join("\n")
}

/// Risk decision of a transaction-details document.
pub fn risk_decision(details: &Value) -> Option<&str> {
    details
        .pointer("/riskInformation/profile/decision")
        .or_else(|| details.get("decision"))
        .and_then(Value::as_str)
}

/// Interprets a refund response.
pub fn refund_result(status: StatusCode, body: Value) -> Result<RefundOutcome, GatewayError> {
    // Declines arrive as 2xx with a DECLINED status or as 400/422. Auth,
    // routing and throttling failures say nothing about the refund itself.
    let decline_status = matches!(
        status,
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY
    );
    if !status.is_success() && !decline_status {
        return Err(GatewayError::Unavailable(format!(
            "CyberSource responded with HTTP {status}"
        )));
    }

    let provider_status = body
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let declined = matches!(provider_status, "DECLINED" | "INVALID_REQUEST");

    if status.is_success() && !declined {
        if let Some(id) = body.get("id").and_then(Value::as_str) {
            return Ok(RefundOutcome {
                refund_ref: id.to_string(),
                raw: body.clone(),
            });
        }
        return Err(GatewayError::InvalidResponse(
            "refund response has no id".to_string(),
        ));
    }

    let code = body
        .pointer("/errorInformation/reason")
        .or_else(|| body.get("reason"))
        .and_then(Value::as_str)
        .unwrap_or(provider_status)
        .to_string();
    let message = body
        .pointer("/errorInformation/message")
        .or_else(|| body.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("Refund declined by CyberSource (HTTP {status})"));
    Err(GatewayError::Refused { code, message })
}

pub struct CyberSourceGateway {
    config: CyberSourceConfig,
    secret: Vec<u8>,
    client: reqwest::Client,
}

impl CyberSourceGateway {
    pub fn new(config: CyberSourceConfig, timeout: Duration) -> Result<Self, GatewayError> {
        let secret = B64.decode(config.api_secret.trim()).map_err(|e| {
            GatewayError::Configuration(format!("CYBERSOURCE_API_SECRET is not base64: {e}"))
        })?;
        Ok(Self {
            config,
            secret,
            client: http_client(timeout)?,
        })
    }

    pub fn signature_header(
        &self,
        signing_string: &str,
        has_body: bool,
    ) -> Result<String, GatewayError> {
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.secret)
            .map_err(|e| GatewayError::Configuration(format!("HMAC key error: {e}")))?;
        mac.update(signing_string.as_bytes());
        let signature = B64.encode(mac.finalize().into_bytes());
        Ok(format!(
            "keyid=\"{}\", algorithm=\"HmacSHA256\", headers=\"{}\", signature=\"{}\"",
            self.config.api_key_id,
            signed_header_names(has_body),
            signature
        ))
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Response, GatewayError> {
        let host = self.config.host.as_str();
        let date = http_date(Utc::now());
        let payload = body
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        let digest = payload.as_deref().map(digest_header);
        let to_sign = signing_string(
            host,
            &date,
            &method,
            path,
            digest.as_deref(),
            &self.config.merchant_id,
        );

        let signature = self.signature_header(&to_sign, digest.is_some())?;
        let mut request = self
            .client
            .request(method, format!("https://{host}{path}"))
            .header("v-c-merchant-id", &self.config.merchant_id)
            .header("date", date)
            .header("signature", signature);
        if let (Some(payload), Some(digest)) = (payload, digest) {
            request = request
                .header("digest", digest)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(payload);
        }

        Ok(request.send().await?)
    }
}

#[async_trait]
impl PaymentGateway for CyberSourceGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Cybersource
    }

    async fn initiate(&self, ticket: &Ticket) -> Result<PaymentInitiation, GatewayError> {
        let mut body = json!({
            "clientVersion": "0.19",
            "allowedCardNetworks": ["VISA", "MASTERCARD", "AMEX"],
            "allowedPaymentTypes": ["PANENTRY"],
            "country": "QA",
            "locale": "en_QA",
            "orderInformation": {
                "amountDetails": {
                    "totalAmount": ticket.price.round_dp(2).to_string(),
                    "currency": self.config.currency,
                }
            }
        });
        if let Some(origin) = &self.config.target_origin {
            body["targetOrigins"] = json!([origin]);
        }

        let response = self
            .send(Method::POST, "/up/v1/capture-contexts", Some(&body))
            .await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(GatewayError::Unavailable(format!(
                "capture context request failed with HTTP {status}"
            )));
        }

        Ok(PaymentInitiation {
            payment_method: PaymentMethod::Cybersource,
            redirect_url: None,
            form_fields: Default::default(),
            client_token: Some(text.trim().to_string()),
            provider_ref: None,
        })
    }

    async fn inquire(&self, ticket: &Ticket) -> Result<InquiryOutcome, GatewayError> {
        let payment_id = ticket
            .provider_transaction_ref
            .as_deref()
            .ok_or(GatewayError::MissingReference)?;

        let path = format!("/tss/v2/transactions/{payment_id}");
        let response = self.send(Method::GET, &path, None).await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            info!(ticket = %ticket.unique_id, "CyberSource has no such transaction");
            return Ok(InquiryOutcome {
                paid: false,
                raw: json!({ "httpStatus": status.as_u16() }),
            });
        }
        if !status.is_success() {
            return Err(GatewayError::Unavailable(format!(
                "CyberSource responded with HTTP {status}"
            )));
        }

        let details: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        let decision = risk_decision(&details).unwrap_or_default().to_string();
        let paid = decision == DECISION_ACCEPT;

        info!(ticket = %ticket.unique_id, decision = %decision, paid, "CyberSource inquiry completed");
        Ok(InquiryOutcome { paid, raw: details })
    }

    fn new_refund_reference(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }

    async fn refund(
        &self,
        ticket: &Ticket,
        amount: Decimal,
        reference: &str,
    ) -> Result<RefundOutcome, GatewayError> {
        let payment_id = ticket
            .provider_transaction_ref
            .as_deref()
            .ok_or(GatewayError::MissingReference)?;

        let body = json!({
            "clientReferenceInformation": { "code": reference },
            "orderInformation": {
                "amountDetails": {
                    "totalAmount": amount.round_dp(2).to_string(),
                    "currency": self.config.currency,
                }
            }
        });
        let path = format!("/pts/v2/payments/{payment_id}/refunds");
        let response = self.send(Method::POST, &path, Some(&body)).await?;
        let status = response.status();
        let payload: Value = response.json().await.unwrap_or(Value::Null);

        let outcome = refund_result(status, payload);
        match &outcome {
            Ok(o) => info!(ticket = %ticket.unique_id, refund_id = %o.refund_ref, "CyberSource accepted refund"),
            Err(e) => warn!(ticket = %ticket.unique_id, error = %e, "CyberSource refund not accepted"),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn gateway() -> CyberSourceGateway {
        CyberSourceGateway::new(
            CyberSourceConfig {
                merchant_id: "tours_qa".to_string(),
                api_key_id: "key-123".to_string(),
                api_secret: B64.encode(b"shared-secret"),
                host: "apitest.cybersource.com".to_string(),
                currency: "QAR".to_string(),
                target_origin: None,
            },
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_accept_is_the_only_paid_decision() {
        let accept = json!({ "riskInformation": { "profile": { "decision": "ACCEPT" } } });
        let review = json!({ "riskInformation": { "profile": { "decision": "REVIEW" } } });
        assert_eq!(risk_decision(&accept), Some("ACCEPT"));
        assert_eq!(risk_decision(&review), Some("REVIEW"));
        assert_eq!(risk_decision(&json!({ "decision": "REJECT" })), Some("REJECT"));
        assert_eq!(risk_decision(&json!({})), None);
    }

    #[test]
    fn test_signing_string_layout() {
        let s = signing_string(
            "apitest.cybersource.com",
            "Thu, 01 Jan 2026 00:00:00 GMT",
            &Method::POST,
            "/pts/v2/payments/123/refunds",
            Some("SHA-256=abc"),
            "tours_qa",
        );
        assert_eq!(
            s,
            "host: apitest.cybersource.com\n\
             date: Thu, 01 Jan 2026 00:00:00 GMT\n\
             (request-target): post /pts/v2/payments/123/refunds\n\
             digest: SHA-256=abc\n\
             v-c-merchant-id: tours_qa"
        );
    }

    #[test]
    fn test_signature_header_is_deterministic() {
        let gw = gateway();
        let a = gw.signature_header("payload", false).unwrap();
        let b = gw.signature_header("payload", false).unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("keyid=\"key-123\", algorithm=\"HmacSHA256\""));
        assert!(a.contains("headers=\"host date (request-target) v-c-merchant-id\""));
    }

    #[test]
    fn test_http_date_format() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(http_date(now), "Thu, 01 Jan 2026 00:00:00 GMT");
    }

    #[test]
    fn test_digest_of_empty_body() {
        assert_eq!(
            digest_header(b""),
            "SHA-256=47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="
        );
    }

    #[test]
    fn test_refund_result_success_and_refusal() {
        let ok = refund_result(
            StatusCode::CREATED,
            json!({ "id": "7001", "status": "PENDING" }),
        )
        .unwrap();
        assert_eq!(ok.refund_ref, "7001");

        let refused = refund_result(
            StatusCode::BAD_REQUEST,
            json!({ "status": "INVALID_REQUEST", "reason": "INVALID_AMOUNT", "message": "Amount exceeds capture" }),
        )
        .unwrap_err();
        match refused {
            GatewayError::Refused { code, message } => {
                assert_eq!(code, "INVALID_AMOUNT");
                assert_eq!(message, "Amount exceeds capture");
            }
            other => panic!("unexpected {other:?}"),
        }

        let down = refund_result(StatusCode::BAD_GATEWAY, Value::Null).unwrap_err();
        assert!(matches!(down, GatewayError::Unavailable(_)));
    }

    #[test]
    fn test_auth_and_throttling_errors_are_not_refusals() {
        for status in [
            StatusCode::UNAUTHORIZED,
            StatusCode::FORBIDDEN,
            StatusCode::NOT_FOUND,
            StatusCode::TOO_MANY_REQUESTS,
        ] {
            let err = refund_result(
                status,
                json!({ "response": { "rmsg": "Authentication Failed" } }),
            )
            .unwrap_err();
            assert!(
                matches!(err, GatewayError::Unavailable(_)),
                "{status} mapped to {err:?}"
            );
        }

        let declined = refund_result(
            StatusCode::CREATED,
            json!({ "id": "7002", "status": "DECLINED", "errorInformation": { "reason": "PROCESSOR_DECLINED" } }),
        )
        .unwrap_err();
        assert!(matches!(declined, GatewayError::Refused { .. }));
    }

    #[test]
    fn test_rejects_non_base64_secret() {
        let err = CyberSourceGateway::new(
            CyberSourceConfig {
                merchant_id: "m".to_string(),
                api_key_id: "k".to_string(),
                api_secret: "not base64 !!".to_string(),
                host: "apitest.cybersource.com".to_string(),
                currency: "QAR".to_string(),
                target_origin: None,
            },
            Duration::from_secs(1),
        )
        .err()
        .unwrap();
        assert!(matches!(err, GatewayError::Configuration(_)));
    }
}
