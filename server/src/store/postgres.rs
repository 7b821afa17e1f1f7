use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{
    CatalogStore, CouponClaim, CouponStore, PaymentUpdate, RefundStore, StoreError, StoreResult,
    TicketStore,
};
use crate::models::{
    AddOn, AddOnSelection, Coupon, CouponStatus, DiscountRule, PaymentStatus, PriceTier,
    PricingCatalogEntry, RefundRequest, RefundStatus, Ticket, TicketStatus,
};

const TICKET_COLUMNS: &str = "id, unique_id, catalog_item_id, buyer_email, adult_count, \
     child_count, add_on_selections, coupon_id, price, payment_method, provider_transaction_ref, \
     refund_provider_ref, status, payment_status, created_at, updated_at";

const COUPON_COLUMNS: &str = "id, code, catalog_item_id, valid_from, valid_to, adult_discount, \
     child_discount, usage_limit_per_user, status, created_at, updated_at";

const REFUND_COLUMNS: &str = "id, ticket_id, reason, payment_method, status, refund_amount, \
     provider_correlation_id, created_at, updated_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn corrupt(what: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("{what}: {e}"))
}

fn count_from_db(raw: i32, what: &str) -> StoreResult<u32> {
    u32::try_from(raw).map_err(|e| corrupt(what, e))
}

fn count_to_db(value: u32, what: &str) -> StoreResult<i32> {
    i32::try_from(value).map_err(|_| StoreError::OutOfRange(format!("{what} {value} is too large")))
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[derive(FromRow)]
struct CatalogRow {
    id: Uuid,
    flat_adult_price: Option<Decimal>,
    flat_child_price: Option<Decimal>,
    tiered_adult_pricing: Json<Vec<PriceTier>>,
    tiered_child_pricing: Json<Vec<PriceTier>>,
    add_ons: Json<Vec<AddOn>>,
}

impl From<CatalogRow> for PricingCatalogEntry {
    fn from(row: CatalogRow) -> Self {
        PricingCatalogEntry {
            id: row.id,
            flat_adult_price: row.flat_adult_price,
            flat_child_price: row.flat_child_price,
            tiered_adult_pricing: row.tiered_adult_pricing.0,
            tiered_child_pricing: row.tiered_child_pricing.0,
            add_ons: row.add_ons.0,
        }
        .normalized()
    }
}

#[derive(FromRow)]
struct CouponRow {
    id: Uuid,
    code: String,
    catalog_item_id: Uuid,
    valid_from: DateTime<Utc>,
    valid_to: DateTime<Utc>,
    adult_discount: Json<DiscountRule>,
    child_discount: Json<DiscountRule>,
    usage_limit_per_user: i32,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CouponRow> for Coupon {
    type Error = StoreError;

    fn try_from(row: CouponRow) -> StoreResult<Self> {
        Ok(Coupon {
            id: row.id,
            code: row.code,
            catalog_item_id: row.catalog_item_id,
            valid_from: row.valid_from,
            valid_to: row.valid_to,
            adult_discount: row.adult_discount.0,
            child_discount: row.child_discount.0,
            usage_limit_per_user: count_from_db(row.usage_limit_per_user, "usage_limit_per_user")?,
            status: row.status.parse().map_err(|e| corrupt("coupon status", e))?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct TicketRow {
    id: Uuid,
    unique_id: String,
    catalog_item_id: Uuid,
    buyer_email: String,
    adult_count: i32,
    child_count: i32,
    add_on_selections: Json<Vec<AddOnSelection>>,
    coupon_id: Option<Uuid>,
    price: Decimal,
    payment_method: String,
    provider_transaction_ref: Option<String>,
    refund_provider_ref: Option<String>,
    status: String,
    payment_status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = StoreError;

    fn try_from(row: TicketRow) -> StoreResult<Self> {
        Ok(Ticket {
            id: row.id,
            unique_id: row.unique_id,
            catalog_item_id: row.catalog_item_id,
            buyer_email: row.buyer_email,
            adult_count: count_from_db(row.adult_count, "adult_count")?,
            child_count: count_from_db(row.child_count, "child_count")?,
            add_on_selections: row.add_on_selections.0,
            coupon_id: row.coupon_id,
            price: row.price,
            payment_method: row
                .payment_method
                .parse()
                .map_err(|e| corrupt("payment method", e))?,
            provider_transaction_ref: row.provider_transaction_ref,
            refund_provider_ref: row.refund_provider_ref,
            status: row.status.parse().map_err(|e| corrupt("ticket status", e))?,
            payment_status: row
                .payment_status
                .parse()
                .map_err(|e| corrupt("payment status", e))?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct RefundRow {
    id: Uuid,
    ticket_id: Uuid,
    reason: String,
    payment_method: String,
    status: String,
    refund_amount: Decimal,
    provider_correlation_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RefundRow> for RefundRequest {
    type Error = StoreError;

    fn try_from(row: RefundRow) -> StoreResult<Self> {
        Ok(RefundRequest {
            id: row.id,
            ticket_id: row.ticket_id,
            reason: row.reason,
            payment_method: row
                .payment_method
                .parse()
                .map_err(|e| corrupt("payment method", e))?,
            status: row.status.parse().map_err(|e| corrupt("refund status", e))?,
            refund_amount: row.refund_amount,
            provider_correlation_id: row.provider_correlation_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl CatalogStore for PgStore {
    async fn get_pricing(&self, catalog_item_id: Uuid) -> StoreResult<Option<PricingCatalogEntry>> {
        let row = sqlx::query_as::<_, CatalogRow>(
            "SELECT id, flat_adult_price, flat_child_price, tiered_adult_pricing, \
             tiered_child_pricing, add_ons FROM catalog_items WHERE id = $1",
        )
        .bind(catalog_item_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(PricingCatalogEntry::from))
    }

    async fn upsert_pricing(&self, entry: &PricingCatalogEntry) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO catalog_items (id, flat_adult_price, flat_child_price, \
             tiered_adult_pricing, tiered_child_pricing, add_ons, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, NOW())
             ON CONFLICT (id) DO UPDATE SET
                flat_adult_price = $2, flat_child_price = $3, tiered_adult_pricing = $4,
                tiered_child_pricing = $5, add_ons = $6, updated_at = NOW()",
        )
        .bind(entry.id)
        .bind(entry.flat_adult_price)
        .bind(entry.flat_child_price)
        .bind(Json(&entry.tiered_adult_pricing))
        .bind(Json(&entry.tiered_child_pricing))
        .bind(Json(&entry.add_ons))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CouponStore for PgStore {
    async fn insert_coupons(&self, coupons: &[Coupon]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for coupon in coupons {
            let usage_limit = count_to_db(coupon.usage_limit_per_user, "usageLimitPerUser")?;
            let result = sqlx::query(
                "INSERT INTO coupons (id, code, catalog_item_id, valid_from, valid_to, \
                 adult_discount, child_discount, usage_limit_per_user, status, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            )
            .bind(coupon.id)
            .bind(&coupon.code)
            .bind(coupon.catalog_item_id)
            .bind(coupon.valid_from)
            .bind(coupon.valid_to)
            .bind(Json(coupon.adult_discount))
            .bind(Json(coupon.child_discount))
            .bind(usage_limit)
            .bind(coupon.status.as_str())
            .bind(coupon.created_at)
            .bind(coupon.updated_at)
            .execute(&mut *tx)
            .await;

            match result {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => {
                    return Err(StoreError::Conflict(format!(
                        "coupon '{}' already exists for item {}",
                        coupon.code, coupon.catalog_item_id
                    )));
                }
                Err(e) => return Err(e.into()),
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn find_active_coupon(
        &self,
        code: &str,
        catalog_item_id: Uuid,
    ) -> StoreResult<Option<Coupon>> {
        let row = sqlx::query_as::<_, CouponRow>(&format!(
            "SELECT {COUPON_COLUMNS} FROM coupons
             WHERE code = $1 AND catalog_item_id = $2 AND status = 'active'"
        ))
        .bind(code)
        .bind(catalog_item_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Coupon::try_from).transpose()
    }

    async fn list_coupons(&self, catalog_item_id: Option<Uuid>) -> StoreResult<Vec<Coupon>> {
        let rows = sqlx::query_as::<_, CouponRow>(&format!(
            "SELECT {COUPON_COLUMNS} FROM coupons
             WHERE $1::uuid IS NULL OR catalog_item_id = $1
             ORDER BY created_at DESC"
        ))
        .bind(catalog_item_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Coupon::try_from).collect()
    }

    async fn set_coupon_status(
        &self,
        id: Uuid,
        status: CouponStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Coupon>> {
        let row = sqlx::query_as::<_, CouponRow>(&format!(
            "UPDATE coupons SET status = $1, updated_at = $2 WHERE id = $3
             RETURNING {COUPON_COLUMNS}"
        ))
        .bind(status.as_str())
        .bind(at)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Coupon::try_from).transpose()
    }

    async fn delete_coupon(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM coupons WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_coupon_uses(
        &self,
        catalog_item_id: Uuid,
        coupon_id: Uuid,
        buyer_email: &str,
    ) -> StoreResult<u64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM tickets
             WHERE catalog_item_id = $1 AND coupon_id = $2 AND buyer_email = $3",
        )
        .bind(catalog_item_id)
        .bind(coupon_id)
        .bind(buyer_email)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl TicketStore for PgStore {
    async fn insert_ticket(&self, ticket: &Ticket, claim: Option<CouponClaim>) -> StoreResult<()> {
        let adult_count = count_to_db(ticket.adult_count, "adultCount")?;
        let child_count = count_to_db(ticket.child_count, "childCount")?;
        let mut tx = self.pool.begin().await?;

        if let Some(claim) = claim {
            // Serialises concurrent bookings of the same coupon until commit.
            let locked: Option<(Uuid,)> =
                sqlx::query_as("SELECT id FROM coupons WHERE id = $1 FOR UPDATE")
                    .bind(claim.coupon_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            if locked.is_none() {
                return Err(StoreError::Conflict(format!(
                    "coupon {} no longer exists",
                    claim.coupon_id
                )));
            }

            let (used,): (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM tickets
                 WHERE catalog_item_id = $1 AND coupon_id = $2 AND buyer_email = $3",
            )
            .bind(ticket.catalog_item_id)
            .bind(claim.coupon_id)
            .bind(&ticket.buyer_email)
            .fetch_one(&mut *tx)
            .await?;

            if claim.usage_limit_per_user != 0 && used >= i64::from(claim.usage_limit_per_user) {
                return Err(StoreError::CouponLimitReached);
            }
        }

        let result = sqlx::query(&format!(
            "INSERT INTO tickets ({TICKET_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)"
        ))
        .bind(ticket.id)
        .bind(&ticket.unique_id)
        .bind(ticket.catalog_item_id)
        .bind(&ticket.buyer_email)
        .bind(adult_count)
        .bind(child_count)
        .bind(Json(&ticket.add_on_selections))
        .bind(ticket.coupon_id)
        .bind(ticket.price)
        .bind(ticket.payment_method.as_str())
        .bind(&ticket.provider_transaction_ref)
        .bind(&ticket.refund_provider_ref)
        .bind(ticket.status.as_str())
        .bind(ticket.payment_status.as_str())
        .bind(ticket.created_at)
        .bind(ticket.updated_at)
        .execute(&mut *tx)
        .await;

        match result {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(StoreError::Conflict(format!(
                    "ticket reference {} already exists",
                    ticket.unique_id
                )));
            }
            Err(e) => return Err(e.into()),
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_ticket(&self, id: Uuid) -> StoreResult<Option<Ticket>> {
        let row = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Ticket::try_from).transpose()
    }

    async fn get_ticket_by_unique_id(&self, unique_id: &str) -> StoreResult<Option<Ticket>> {
        let row = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE unique_id = $1"
        ))
        .bind(unique_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Ticket::try_from).transpose()
    }

    async fn set_provider_transaction_ref(
        &self,
        id: Uuid,
        provider_ref: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Ticket> {
        let row = sqlx::query_as::<_, TicketRow>(&format!(
            "UPDATE tickets SET provider_transaction_ref = $1, updated_at = $2 WHERE id = $3
             RETURNING {TICKET_COLUMNS}"
        ))
        .bind(provider_ref)
        .bind(at)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Ticket::try_from)
            .transpose()?
            .ok_or_else(|| StoreError::Conflict(format!("ticket {id} does not exist")))
    }

    async fn transition_payment(
        &self,
        id: Uuid,
        expected: PaymentStatus,
        update: PaymentUpdate,
    ) -> StoreResult<Ticket> {
        let row = sqlx::query_as::<_, TicketRow>(&format!(
            "UPDATE tickets
             SET payment_status = $1,
                 refund_provider_ref = COALESCE($2, refund_provider_ref),
                 updated_at = $3
             WHERE id = $4 AND payment_status = $5
             RETURNING {TICKET_COLUMNS}"
        ))
        .bind(update.status.as_str())
        .bind(update.refund_provider_ref.as_deref())
        .bind(update.at)
        .bind(id)
        .bind(expected.as_str())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Ticket::try_from(row);
        }

        match self.get_ticket(id).await? {
            Some(current) => Err(StoreError::StatusChanged {
                expected,
                actual: current.payment_status,
            }),
            None => Err(StoreError::Conflict(format!("ticket {id} does not exist"))),
        }
    }

    async fn set_ticket_status(
        &self,
        id: Uuid,
        status: TicketStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<Ticket> {
        let row = sqlx::query_as::<_, TicketRow>(&format!(
            "UPDATE tickets SET status = $1, updated_at = $2 WHERE id = $3
             RETURNING {TICKET_COLUMNS}"
        ))
        .bind(status.as_str())
        .bind(at)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Ticket::try_from)
            .transpose()?
            .ok_or_else(|| StoreError::Conflict(format!("ticket {id} does not exist")))
    }
}

#[async_trait]
impl RefundStore for PgStore {
    async fn insert_refund_request(&self, request: &RefundRequest) -> StoreResult<()> {
        let result = sqlx::query(&format!(
            "INSERT INTO refund_requests ({REFUND_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(request.id)
        .bind(request.ticket_id)
        .bind(&request.reason)
        .bind(request.payment_method.as_str())
        .bind(request.status.as_str())
        .bind(request.refund_amount)
        .bind(&request.provider_correlation_id)
        .bind(request.created_at)
        .bind(request.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StoreError::OpenRefundExists),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_refund_request(&self, request: &RefundRequest) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE refund_requests
             SET reason = $1, status = $2, refund_amount = $3, provider_correlation_id = $4,
                 updated_at = $5
             WHERE id = $6",
        )
        .bind(&request.reason)
        .bind(request.status.as_str())
        .bind(request.refund_amount)
        .bind(&request.provider_correlation_id)
        .bind(request.updated_at)
        .bind(request.id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::OpenRefundExists
            } else {
                StoreError::Database(e)
            }
        })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "refund request {} does not exist",
                request.id
            )));
        }
        Ok(())
    }

    async fn open_refund_request(&self, ticket_id: Uuid) -> StoreResult<Option<RefundRequest>> {
        let row = sqlx::query_as::<_, RefundRow>(&format!(
            "SELECT {REFUND_COLUMNS} FROM refund_requests
             WHERE ticket_id = $1 AND status IN ('PendingApproval', 'ProcessingRefund')"
        ))
        .bind(ticket_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(RefundRequest::try_from).transpose()
    }

    async fn latest_refund_request(&self, ticket_id: Uuid) -> StoreResult<Option<RefundRequest>> {
        let row = sqlx::query_as::<_, RefundRow>(&format!(
            "SELECT {REFUND_COLUMNS} FROM refund_requests
             WHERE ticket_id = $1 ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(ticket_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(RefundRequest::try_from).transpose()
    }

    async fn list_refund_requests(
        &self,
        status: Option<RefundStatus>,
    ) -> StoreResult<Vec<RefundRequest>> {
        let rows = sqlx::query_as::<_, RefundRow>(&format!(
            "SELECT {REFUND_COLUMNS} FROM refund_requests
             WHERE $1::text IS NULL OR status = $1
             ORDER BY created_at DESC"
        ))
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(RefundRequest::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_outside_column_range_are_refused() {
        assert_eq!(count_to_db(12, "adultCount").unwrap(), 12);
        assert!(matches!(
            count_to_db(u32::MAX, "adultCount"),
            Err(StoreError::OutOfRange(_))
        ));
        assert!(count_from_db(-1, "child_count").is_err());
    }
}
