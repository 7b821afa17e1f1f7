use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

use tour_booking_server::config::{AddOnPolicy, MissingRefPolicy};
use tour_booking_server::gateway::{
    GatewayError, GatewayRegistry, InquiryOutcome, PaymentGateway, PaymentInitiation,
    RefundOutcome,
};
use tour_booking_server::models::{PaymentMethod, PricingCatalogEntry, Ticket};
use tour_booking_server::notify::LogNotifier;
use tour_booking_server::routes::{create_routes, with_layers};
use tour_booking_server::services::ReconcilerPolicy;
use tour_booking_server::state::AppState;
use tour_booking_server::store::{CatalogStore, MemoryStore};

/// Provider double: every inquiry reports paid, refunds answer with `refusal`
/// when set.
struct ScriptedGateway {
    refusal: Option<(&'static str, &'static str)>,
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Qpay
    }

    async fn initiate(&self, _ticket: &Ticket) -> Result<PaymentInitiation, GatewayError> {
        Ok(PaymentInitiation {
            payment_method: PaymentMethod::Qpay,
            redirect_url: Some("https://qpay.test/pay".to_string()),
            form_fields: BTreeMap::from([("Action".to_string(), "0".to_string())]),
            client_token: None,
            provider_ref: Some("PUN0001".to_string()),
        })
    }

    async fn inquire(&self, _ticket: &Ticket) -> Result<InquiryOutcome, GatewayError> {
        Ok(InquiryOutcome {
            paid: true,
            raw: json!({ "Response.Status": "0000" }),
        })
    }

    fn new_refund_reference(&self) -> String {
        "REFUNDPUN0001".to_string()
    }

    async fn refund(
        &self,
        _ticket: &Ticket,
        _amount: Decimal,
        reference: &str,
    ) -> Result<RefundOutcome, GatewayError> {
        match self.refusal {
            Some((code, message)) => Err(GatewayError::Refused {
                code: code.to_string(),
                message: message.to_string(),
            }),
            None => Ok(RefundOutcome {
                refund_ref: reference.to_string(),
                raw: json!({ "Response.Status": "5002" }),
            }),
        }
    }
}

async fn app(refusal: Option<(&'static str, &'static str)>) -> (Router, Uuid) {
    let store = Arc::new(MemoryStore::new());
    let item = Uuid::new_v4();
    store
        .upsert_pricing(&PricingCatalogEntry {
            id: item,
            flat_adult_price: Some(Decimal::from(50)),
            flat_child_price: Some(Decimal::from(20)),
            tiered_adult_pricing: vec![],
            tiered_child_pricing: vec![],
            add_ons: vec![],
        })
        .await
        .unwrap();

    let state = AppState::new(
        store,
        GatewayRegistry::new().with(Arc::new(ScriptedGateway { refusal })),
        Arc::new(LogNotifier),
        ReconcilerPolicy {
            missing_ref: MissingRefPolicy::MarkPaid,
            gateway_timeout: Duration::from_secs(2),
        },
        AddOnPolicy::Skip,
    );
    (with_layers(create_routes(state), None, false), item)
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    let request = match body {
        Some(body) => request.body(Body::from(body.to_string())).unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn create_coupon(app: &Router, item: Uuid, limit: u32) {
    let now = Utc::now();
    let (status, _) = call(
        app,
        Method::POST,
        "/coupons",
        Some(json!({
            "code": "SPRING",
            "catalogItemIds": [item],
            "validFrom": now - ChronoDuration::days(1),
            "validTo": now + ChronoDuration::days(1),
            "adultDiscount": { "type": "percentage", "value": 10 },
            "childDiscount": { "type": "flat", "value": 5 },
            "usageLimitPerUser": limit
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

async fn book(app: &Router, item: Uuid, coupon: Option<&str>) -> Value {
    let (status, body) = call(
        app,
        Method::POST,
        "/tickets",
        Some(json!({
            "catalogItemId": item,
            "buyerEmail": "guest@example.com",
            "adultCount": 2,
            "childCount": 1,
            "couponCode": coupon,
            "paymentMethod": "qpay"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["data"].clone()
}

async fn paid_ticket(app: &Router, item: Uuid) -> Value {
    let ticket = book(app, item, None).await;
    let unique_id = ticket["uniqueId"].as_str().unwrap();
    call(
        app,
        Method::POST,
        "/tickets/payment-callback",
        Some(json!({ "uniqueId": unique_id, "providerRef": "PUN0001" })),
    )
    .await;
    let (_, body) = call(
        app,
        Method::POST,
        "/tickets/payment-inquire",
        Some(json!({ "uniqueId": unique_id })),
    )
    .await;
    assert_eq!(body["data"]["updatedPaymentStatus"], "Paid");
    ticket
}

#[tokio::test]
async fn health_check_carries_security_headers() {
    let (app, _) = app(None).await;
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    assert!(response.headers().get("strict-transport-security").is_none());
}

#[tokio::test]
async fn apply_discount_returns_breakdown() {
    let (app, item) = app(None).await;
    create_coupon(&app, item, 0).await;

    let (status, body) = call(
        &app,
        Method::POST,
        "/coupons/apply-discount",
        Some(json!({
            "couponCode": "SPRING",
            "catalogItemId": item,
            "buyerEmail": "guest@example.com",
            "adultCount": 2,
            "childCount": 1,
            "addOns": []
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["originalPrice"], 120.0);
    assert_eq!(body["data"]["adultDiscountAmount"], 10.0);
    assert_eq!(body["data"]["childDiscountAmount"], 5.0);
    assert_eq!(body["data"]["discountedPrice"], 105.0);
}

#[tokio::test]
async fn unknown_coupon_uses_error_envelope() {
    let (app, item) = app(None).await;
    let (status, body) = call(
        &app,
        Method::POST,
        "/coupons/apply-discount",
        Some(json!({
            "couponCode": "NOPE",
            "catalogItemId": item,
            "buyerEmail": "guest@example.com",
            "adultCount": 1
        })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "INVALID_COUPON");
}

#[tokio::test]
async fn malformed_body_is_validation_error() {
    let (app, _) = app(None).await;
    let (status, body) = call(
        &app,
        Method::POST,
        "/tickets/payment-inquire",
        Some(json!({ "ticket": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn coupon_limit_applies_to_bookings() {
    let (app, item) = app(None).await;
    create_coupon(&app, item, 1).await;

    let ticket = book(&app, item, Some("SPRING")).await;
    assert_eq!(ticket["price"], 105.0);

    let (status, body) = call(
        &app,
        Method::POST,
        "/tickets",
        Some(json!({
            "catalogItemId": item,
            "buyerEmail": "GUEST@example.com",
            "adultCount": 1,
            "couponCode": "SPRING",
            "paymentMethod": "qpay"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "COUPON_LIMIT_EXCEEDED");
}

#[tokio::test]
async fn inquiry_for_unknown_ticket_reports_cancelled() {
    let (app, _) = app(None).await;
    let (status, body) = call(
        &app,
        Method::POST,
        "/tickets/payment-inquire",
        Some(json!({ "uniqueId": "TBDOESNOTEXIST" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["found"], false);
    assert_eq!(body["data"]["updatedPaymentStatus"], "Cancelled");
}

#[tokio::test]
async fn refund_request_then_operator_refund() {
    let (app, item) = app(None).await;
    let ticket = paid_ticket(&app, item).await;
    let unique_id = ticket["uniqueId"].as_str().unwrap();
    let ticket_id = ticket["id"].as_str().unwrap();

    let (status, body) = call(
        &app,
        Method::POST,
        "/tickets/qpay-refund-request",
        Some(json!({ "uniqueId": unique_id, "reason": "Flight cancelled" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body["data"]["refundId"].is_string());

    let (status, body) = call(
        &app,
        Method::POST,
        "/tickets/qpay-refund-request",
        Some(json!({ "uniqueId": unique_id, "reason": "Again" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "ALREADY_REQUESTED");

    let (status, body) = call(
        &app,
        Method::POST,
        "/tickets/qpay-refund",
        Some(json!({ "ticketId": ticket_id, "refundAmount": 120 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["ticket"]["paymentStatus"], "RefundProcessing");
    assert_eq!(body["data"]["ticket"]["refundProviderRef"], "REFUNDPUN0001");
    assert_eq!(body["data"]["refundRequest"]["status"], "ProcessingRefund");

    let (_, body) = call(&app, Method::GET, "/refunds?status=ProcessingRefund", None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn refused_refund_keeps_ticket_paid() {
    let (app, item) = app(Some(("5004", "Original transaction not found for refund."))).await;
    let ticket = paid_ticket(&app, item).await;
    let ticket_id = ticket["id"].as_str().unwrap();

    let (status, body) = call(
        &app,
        Method::POST,
        "/tickets/qpay-refund",
        Some(json!({ "ticketId": ticket_id, "refundAmount": 50 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "REFUND_FAILED");
    assert_eq!(
        body["error"]["message"],
        "Original transaction not found for refund."
    );

    let uri = format!("/tickets/{}", ticket["uniqueId"].as_str().unwrap());
    let (_, body) = call(&app, Method::GET, &uri, None).await;
    assert_eq!(body["data"]["paymentStatus"], "Paid");
}

#[tokio::test]
async fn refund_of_unpaid_ticket_is_invalid_state() {
    let (app, item) = app(None).await;
    let ticket = book(&app, item, None).await;

    let (status, body) = call(
        &app,
        Method::POST,
        "/tickets/qpay-refund",
        Some(json!({ "ticketId": ticket["id"], "refundAmount": 10 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_STATE");
}

#[tokio::test]
async fn reject_refund_is_idempotent_over_http() {
    let (app, item) = app(None).await;
    let ticket = paid_ticket(&app, item).await;
    let unique_id = ticket["uniqueId"].as_str().unwrap();
    call(
        &app,
        Method::POST,
        "/tickets/qpay-refund-request",
        Some(json!({ "uniqueId": unique_id, "reason": "Weather" })),
    )
    .await;

    for _ in 0..2 {
        let (status, body) = call(
            &app,
            Method::POST,
            "/tickets/reject-refund",
            Some(json!({ "ticketId": ticket["id"] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["data"]["ticket"]["paymentStatus"],
            "RefundRejectedByOperator"
        );
        assert_eq!(body["data"]["refundRequest"]["status"], "Rejected");
    }
}

#[tokio::test]
async fn coupon_toggle_and_delete() {
    let (app, item) = app(None).await;
    create_coupon(&app, item, 0).await;

    let uri = format!("/coupons?catalogItemId={item}");
    let (_, body) = call(&app, Method::GET, &uri, None).await;
    let id = body["data"][0]["id"].as_str().unwrap().to_string();

    let (status, body) = call(
        &app,
        Method::PATCH,
        &format!("/coupons/{id}/status"),
        Some(json!({ "status": "canceled" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "canceled");

    let (status, _) = call(&app, Method::DELETE, &format!("/coupons/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = call(&app, Method::DELETE, &format!("/coupons/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}
