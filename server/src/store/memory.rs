use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    CatalogStore, CouponClaim, CouponStore, PaymentUpdate, RefundStore, StoreError, StoreResult,
    TicketStore,
};
use crate::models::{
    Coupon, CouponStatus, PaymentStatus, PricingCatalogEntry, RefundRequest, RefundStatus, Ticket,
    TicketStatus,
};

#[derive(Default)]
struct State {
    catalog: HashMap<Uuid, PricingCatalogEntry>,
    coupons: HashMap<Uuid, Coupon>,
    tickets: HashMap<Uuid, Ticket>,
    refunds: Vec<RefundRequest>,
}

impl State {
    fn coupon_uses(&self, catalog_item_id: Uuid, coupon_id: Uuid, buyer_email: &str) -> u64 {
        self.tickets
            .values()
            .filter(|t| {
                t.catalog_item_id == catalog_item_id
                    && t.coupon_id == Some(coupon_id)
                    && t.buyer_email == buyer_email
            })
            .count() as u64
    }

    fn ticket_mut(&mut self, id: Uuid) -> StoreResult<&mut Ticket> {
        self.tickets
            .get_mut(&id)
            .ok_or_else(|| StoreError::Conflict(format!("ticket {id} does not exist")))
    }
}

/// Process-local store. One lock guards everything, so every method is atomic.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn get_pricing(&self, catalog_item_id: Uuid) -> StoreResult<Option<PricingCatalogEntry>> {
        Ok(self.state.lock().await.catalog.get(&catalog_item_id).cloned())
    }

    async fn upsert_pricing(&self, entry: &PricingCatalogEntry) -> StoreResult<()> {
        let entry = entry.clone().normalized();
        self.state.lock().await.catalog.insert(entry.id, entry);
        Ok(())
    }
}

#[async_trait]
impl CouponStore for MemoryStore {
    async fn insert_coupons(&self, coupons: &[Coupon]) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        for (i, coupon) in coupons.iter().enumerate() {
            let clash = state
                .coupons
                .values()
                .chain(coupons[..i].iter())
                .any(|c| c.code == coupon.code && c.catalog_item_id == coupon.catalog_item_id);
            if clash {
                return Err(StoreError::Conflict(format!(
                    "coupon '{}' already exists for item {}",
                    coupon.code, coupon.catalog_item_id
                )));
            }
        }
        for coupon in coupons {
            state.coupons.insert(coupon.id, coupon.clone());
        }
        Ok(())
    }

    async fn find_active_coupon(
        &self,
        code: &str,
        catalog_item_id: Uuid,
    ) -> StoreResult<Option<Coupon>> {
        Ok(self
            .state
            .lock()
            .await
            .coupons
            .values()
            .find(|c| {
                c.code == code
                    && c.catalog_item_id == catalog_item_id
                    && c.status == CouponStatus::Active
            })
            .cloned())
    }

    async fn list_coupons(&self, catalog_item_id: Option<Uuid>) -> StoreResult<Vec<Coupon>> {
        let state = self.state.lock().await;
        let mut coupons: Vec<Coupon> = state
            .coupons
            .values()
            .filter(|c| catalog_item_id.map_or(true, |id| c.catalog_item_id == id))
            .cloned()
            .collect();
        coupons.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(coupons)
    }

    async fn set_coupon_status(
        &self,
        id: Uuid,
        status: CouponStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Coupon>> {
        let mut state = self.state.lock().await;
        Ok(state.coupons.get_mut(&id).map(|c| {
            c.status = status;
            c.updated_at = at;
            c.clone()
        }))
    }

    async fn delete_coupon(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.state.lock().await.coupons.remove(&id).is_some())
    }

    async fn count_coupon_uses(
        &self,
        catalog_item_id: Uuid,
        coupon_id: Uuid,
        buyer_email: &str,
    ) -> StoreResult<u64> {
        Ok(self
            .state
            .lock()
            .await
            .coupon_uses(catalog_item_id, coupon_id, buyer_email))
    }
}

#[async_trait]
impl TicketStore for MemoryStore {
    async fn insert_ticket(&self, ticket: &Ticket, claim: Option<CouponClaim>) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if state.tickets.values().any(|t| t.unique_id == ticket.unique_id) {
            return Err(StoreError::Conflict(format!(
                "ticket reference {} already exists",
                ticket.unique_id
            )));
        }
        if let Some(claim) = claim {
            let used =
                state.coupon_uses(ticket.catalog_item_id, claim.coupon_id, &ticket.buyer_email);
            if claim.usage_limit_per_user != 0 && used >= u64::from(claim.usage_limit_per_user) {
                return Err(StoreError::CouponLimitReached);
            }
        }
        state.tickets.insert(ticket.id, ticket.clone());
        Ok(())
    }

    async fn get_ticket(&self, id: Uuid) -> StoreResult<Option<Ticket>> {
        Ok(self.state.lock().await.tickets.get(&id).cloned())
    }

    async fn get_ticket_by_unique_id(&self, unique_id: &str) -> StoreResult<Option<Ticket>> {
        Ok(self
            .state
            .lock()
            .await
            .tickets
            .values()
            .find(|t| t.unique_id == unique_id)
            .cloned())
    }

    async fn set_provider_transaction_ref(
        &self,
        id: Uuid,
        provider_ref: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Ticket> {
        let mut state = self.state.lock().await;
        let ticket = state.ticket_mut(id)?;
        ticket.provider_transaction_ref = Some(provider_ref.to_string());
        ticket.updated_at = at;
        Ok(ticket.clone())
    }

    async fn transition_payment(
        &self,
        id: Uuid,
        expected: PaymentStatus,
        update: PaymentUpdate,
    ) -> StoreResult<Ticket> {
        let mut state = self.state.lock().await;
        let ticket = state.ticket_mut(id)?;
        if ticket.payment_status != expected {
            return Err(StoreError::StatusChanged {
                expected,
                actual: ticket.payment_status,
            });
        }
        ticket.payment_status = update.status;
        if let Some(refund_ref) = update.refund_provider_ref {
            ticket.refund_provider_ref = Some(refund_ref);
        }
        ticket.updated_at = update.at;
        Ok(ticket.clone())
    }

    async fn set_ticket_status(
        &self,
        id: Uuid,
        status: TicketStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<Ticket> {
        let mut state = self.state.lock().await;
        let ticket = state.ticket_mut(id)?;
        ticket.status = status;
        ticket.updated_at = at;
        Ok(ticket.clone())
    }
}

#[async_trait]
impl RefundStore for MemoryStore {
    async fn insert_refund_request(&self, request: &RefundRequest) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let open_exists = state
            .refunds
            .iter()
            .any(|r| r.ticket_id == request.ticket_id && r.status.is_open());
        if request.status.is_open() && open_exists {
            return Err(StoreError::OpenRefundExists);
        }
        state.refunds.push(request.clone());
        Ok(())
    }

    async fn save_refund_request(&self, request: &RefundRequest) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        match state.refunds.iter_mut().find(|r| r.id == request.id) {
            Some(existing) => {
                *existing = request.clone();
                Ok(())
            }
            None => Err(StoreError::Conflict(format!(
                "refund request {} does not exist",
                request.id
            ))),
        }
    }

    async fn open_refund_request(&self, ticket_id: Uuid) -> StoreResult<Option<RefundRequest>> {
        Ok(self
            .state
            .lock()
            .await
            .refunds
            .iter()
            .find(|r| r.ticket_id == ticket_id && r.status.is_open())
            .cloned())
    }

    async fn latest_refund_request(&self, ticket_id: Uuid) -> StoreResult<Option<RefundRequest>> {
        Ok(self
            .state
            .lock()
            .await
            .refunds
            .iter()
            .filter(|r| r.ticket_id == ticket_id)
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn list_refund_requests(
        &self,
        status: Option<RefundStatus>,
    ) -> StoreResult<Vec<RefundRequest>> {
        let state = self.state.lock().await;
        let mut requests: Vec<RefundRequest> = state
            .refunds
            .iter()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(requests)
    }
}
