use axum::{
    routing::{delete, get, patch, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::config::{create_cors_layer, create_security_headers_layer, Config};
use crate::handlers::{coupons, health_check, refunds, tickets};
use crate::state::AppState;

pub fn create_routes(state: AppState) -> Router {
    let coupon_routes = Router::new()
        .route(
            "/coupons",
            post(coupons::create_coupons).get(coupons::list_coupons),
        )
        .route("/coupons/apply-discount", post(coupons::apply_discount))
        .route("/coupons/:id", delete(coupons::delete_coupon))
        .route("/coupons/:id/status", patch(coupons::set_coupon_status));

    let ticket_routes = Router::new()
        .route("/tickets", post(tickets::book_ticket))
        .route("/tickets/:unique_id", get(tickets::get_ticket))
        .route("/tickets/payment-initiate", post(tickets::initiate_payment))
        .route("/tickets/payment-callback", post(tickets::payment_callback))
        .route("/tickets/payment-inquire", post(tickets::payment_inquire))
        .route("/tickets/qpay-refund", post(tickets::qpay_refund))
        .route(
            "/tickets/qpay-refund-request",
            post(tickets::qpay_refund_request),
        )
        .route("/tickets/reject-refund", post(tickets::reject_refund))
        .route("/tickets/complete-refund", post(tickets::complete_refund))
        .route("/tickets/cancel", post(tickets::cancel_ticket))
        .route("/refunds", get(refunds::list_refund_requests));

    Router::new()
        .route("/health", get(health_check))
        .merge(coupon_routes)
        .merge(ticket_routes)
        .with_state(state)
}

/// API routes wrapped in the tracing, CORS and security-header layers.
pub fn create_app(state: AppState, config: &Config) -> Router {
    with_layers(
        create_routes(state),
        config.cors_allowed_origins.as_deref(),
        config.is_production,
    )
}

pub fn with_layers(router: Router, cors_origins: Option<&str>, is_production: bool) -> Router {
    router
        .layer(create_security_headers_layer(is_production))
        .layer(create_cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
}
