//! Persistence seams.
//!
//! Services talk to storage through these traits only. `PgStore` is the
//! production backend; `MemoryStore` backs tests and database-less local runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Coupon, CouponStatus, PaymentStatus, PricingCatalogEntry, RefundRequest, RefundStatus, Ticket,
    TicketStatus,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("value out of range: {0}")]
    OutOfRange(String),

    #[error("coupon usage limit reached")]
    CouponLimitReached,

    #[error("an open refund request already exists for this ticket")]
    OpenRefundExists,

    #[error("payment status is {actual}, expected {expected}")]
    StatusChanged {
        expected: PaymentStatus,
        actual: PaymentStatus,
    },

    #[error("payment status cannot move from {from} to {to}")]
    IllegalTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },

    #[error("stored record is unreadable: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Coupon usage to re-check atomically with a ticket insert.
#[derive(Debug, Clone, Copy)]
pub struct CouponClaim {
    pub coupon_id: Uuid,
    pub usage_limit_per_user: u32,
}

/// Payment-state change applied only if the ticket is still in the expected state.
#[derive(Debug, Clone)]
pub struct PaymentUpdate {
    pub status: PaymentStatus,
    pub refund_provider_ref: Option<String>,
    pub at: DateTime<Utc>,
}

impl PaymentUpdate {
    pub fn to(status: PaymentStatus) -> Self {
        Self {
            status,
            refund_provider_ref: None,
            at: Utc::now(),
        }
    }

    pub fn with_refund_ref(mut self, refund_ref: impl Into<String>) -> Self {
        self.refund_provider_ref = Some(refund_ref.into());
        self
    }
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn get_pricing(&self, catalog_item_id: Uuid) -> StoreResult<Option<PricingCatalogEntry>>;

    async fn upsert_pricing(&self, entry: &PricingCatalogEntry) -> StoreResult<()>;
}

#[async_trait]
pub trait CouponStore: Send + Sync {
    /// Inserts all coupons or none. A repeated `(code, catalog_item_id)` is a conflict.
    async fn insert_coupons(&self, coupons: &[Coupon]) -> StoreResult<()>;

    async fn find_active_coupon(
        &self,
        code: &str,
        catalog_item_id: Uuid,
    ) -> StoreResult<Option<Coupon>>;

    async fn list_coupons(&self, catalog_item_id: Option<Uuid>) -> StoreResult<Vec<Coupon>>;

    async fn set_coupon_status(
        &self,
        id: Uuid,
        status: CouponStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Coupon>>;

    async fn delete_coupon(&self, id: Uuid) -> StoreResult<bool>;

    /// Tickets already booked by `buyer_email` for this item with this coupon.
    async fn count_coupon_uses(
        &self,
        catalog_item_id: Uuid,
        coupon_id: Uuid,
        buyer_email: &str,
    ) -> StoreResult<u64>;
}

#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Inserts the ticket. With a claim, the per-user usage count is re-read and
    /// checked in the same critical section as the insert.
    async fn insert_ticket(&self, ticket: &Ticket, claim: Option<CouponClaim>) -> StoreResult<()>;

    async fn get_ticket(&self, id: Uuid) -> StoreResult<Option<Ticket>>;

    async fn get_ticket_by_unique_id(&self, unique_id: &str) -> StoreResult<Option<Ticket>>;

    async fn set_provider_transaction_ref(
        &self,
        id: Uuid,
        provider_ref: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Ticket>;

    /// Compare-and-set on `payment_status`.
    async fn transition_payment(
        &self,
        id: Uuid,
        expected: PaymentStatus,
        update: PaymentUpdate,
    ) -> StoreResult<Ticket>;

    async fn set_ticket_status(
        &self,
        id: Uuid,
        status: TicketStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<Ticket>;
}

#[async_trait]
pub trait RefundStore: Send + Sync {
    /// Fails with [`StoreError::OpenRefundExists`] if the ticket already has an open request.
    async fn insert_refund_request(&self, request: &RefundRequest) -> StoreResult<()>;

    async fn save_refund_request(&self, request: &RefundRequest) -> StoreResult<()>;

    async fn open_refund_request(&self, ticket_id: Uuid) -> StoreResult<Option<RefundRequest>>;

    async fn latest_refund_request(&self, ticket_id: Uuid) -> StoreResult<Option<RefundRequest>>;

    async fn list_refund_requests(
        &self,
        status: Option<RefundStatus>,
    ) -> StoreResult<Vec<RefundRequest>>;
}

pub trait Store: CatalogStore + CouponStore + TicketStore + RefundStore {}

impl<T> Store for T where T: CatalogStore + CouponStore + TicketStore + RefundStore {}
