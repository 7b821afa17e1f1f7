//! Coupon engine: prices a party for a catalog item and applies a coupon.
//!
//! Pricing is a pure read. Coupon usage is only claimed when a ticket is
//! written, see [`crate::services::booking`].

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AddOnPolicy;
use crate::models::{
    normalize_email, AddOnSelection, Coupon, DiscountRule, PartyPricing, PriceTier,
    PricingCatalogEntry,
};
use crate::store::Store;
use crate::utils::{AppError, AppResult};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceQuoteRequest {
    pub coupon_code: String,
    pub catalog_item_id: Uuid,
    pub buyer_email: String,
    #[serde(default)]
    pub adult_count: u32,
    #[serde(default)]
    pub child_count: u32,
    #[serde(default)]
    pub add_ons: Vec<AddOnSelection>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceBreakdown {
    pub discounted_price: Decimal,
    pub original_price: Decimal,
    pub total_discount_amount: Decimal,
    pub adult_discount_amount: Decimal,
    pub child_discount_amount: Decimal,
}

/// Party and extras to price, shared by quotes and bookings.
#[derive(Debug, Clone)]
pub struct Party<'a> {
    pub catalog_item_id: Uuid,
    pub buyer_email: &'a str,
    pub adult_count: u32,
    pub child_count: u32,
    pub add_ons: &'a [AddOnSelection],
}

/// A priced order and the coupon that was applied, if any.
#[derive(Debug, Clone)]
pub struct PricedOrder {
    pub breakdown: PriceBreakdown,
    pub coupon: Option<Coupon>,
}

fn money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Tier whose threshold is the largest one not above `count`.
pub fn select_tier(tiers: &[PriceTier], count: u32) -> Option<&PriceTier> {
    tiers
        .iter()
        .filter(|t| t.minimum_party_size <= count)
        .max_by_key(|t| t.minimum_party_size)
}

fn party_total(party: &str, pricing: PartyPricing<'_>, count: u32) -> AppResult<Decimal> {
    if count == 0 {
        return Ok(Decimal::ZERO);
    }
    match pricing {
        PartyPricing::Flat(unit_price) => Ok(unit_price * Decimal::from(count)),
        PartyPricing::Tiered(tiers) => match select_tier(tiers, count) {
            Some(tier) => Ok(tier.unit_price * Decimal::from(count)),
            None => {
                let minimum = tiers
                    .iter()
                    .map(|t| t.minimum_party_size)
                    .min()
                    .unwrap_or_default();
                Err(AppError::ValidationError(format!(
                    "minimum {party} count is {minimum}"
                )))
            }
        },
        PartyPricing::Unpriced => Err(AppError::ValidationError(format!(
            "no {party} pricing is configured for this item"
        ))),
        PartyPricing::Conflicting => Err(AppError::ValidationError(format!(
            "{party} pricing is misconfigured"
        ))),
    }
}

fn add_on_total(
    entry: &PricingCatalogEntry,
    selections: &[AddOnSelection],
    policy: AddOnPolicy,
) -> AppResult<Decimal> {
    let mut total = Decimal::ZERO;
    for selection in selections {
        match entry.add_on(selection.add_on_id) {
            Some(add_on) => total += add_on.unit_price * Decimal::from(selection.quantity),
            None if policy == AddOnPolicy::Reject => {
                return Err(AppError::ValidationError(format!(
                    "add-on {} is not offered for this item",
                    selection.add_on_id
                )))
            }
            None => {
                tracing::debug!(
                    catalog_item_id = %entry.id,
                    add_on_id = %selection.add_on_id,
                    "Skipping unknown add-on"
                );
            }
        }
    }
    Ok(total)
}

fn discount(rule: &DiscountRule, base: Decimal, count: u32) -> Decimal {
    if count == 0 {
        Decimal::ZERO
    } else {
        money(rule.amount_on(base))
    }
}

/// Prices `party`, applying `coupon_code` when given.
///
/// Checks run in a fixed order: catalog item, party pricing, coupon lookup,
/// per-user limit, validity window, add-ons.
pub async fn price_order(
    store: &dyn Store,
    party: &Party<'_>,
    coupon_code: Option<&str>,
    add_on_policy: AddOnPolicy,
    now: DateTime<Utc>,
) -> AppResult<PricedOrder> {
    let entry = store
        .get_pricing(party.catalog_item_id)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!("Catalog item {} not found", party.catalog_item_id))
        })?;

    let base_adult = party_total("adult", entry.adult_pricing(), party.adult_count)?;
    let base_child = party_total("child", entry.child_pricing(), party.child_count)?;

    let coupon = match coupon_code {
        Some(code) => {
            let coupon = store
                .find_active_coupon(code, party.catalog_item_id)
                .await?
                .ok_or_else(|| {
                    AppError::InvalidCoupon(format!("Coupon '{code}' is not valid for this item"))
                })?;

            let buyer = normalize_email(party.buyer_email);
            let prior_uses = store
                .count_coupon_uses(party.catalog_item_id, coupon.id, &buyer)
                .await?;
            if coupon.limit_reached(prior_uses) {
                return Err(AppError::CouponLimitExceeded(format!(
                    "Coupon '{code}' can be used {} time(s) per buyer",
                    coupon.usage_limit_per_user
                )));
            }

            if !coupon.is_within_window(now) {
                return Err(AppError::CouponExpired(format!(
                    "Coupon '{code}' is not valid at this time"
                )));
            }
            Some(coupon)
        }
        None => None,
    };

    let (adult_discount, child_discount) = match &coupon {
        Some(c) => (
            discount(&c.adult_discount, base_adult, party.adult_count),
            discount(&c.child_discount, base_child, party.child_count),
        ),
        None => (Decimal::ZERO, Decimal::ZERO),
    };

    let extras = add_on_total(&entry, party.add_ons, add_on_policy)?;

    let party_after_discount =
        (base_adult + base_child - adult_discount - child_discount).max(Decimal::ZERO);
    let discounted_price = money(party_after_discount + extras);
    let original_price = money(base_adult + base_child + extras);

    Ok(PricedOrder {
        breakdown: PriceBreakdown {
            discounted_price,
            original_price,
            total_discount_amount: original_price - discounted_price,
            adult_discount_amount: adult_discount,
            child_discount_amount: child_discount,
        },
        coupon,
    })
}

/// Quote for `POST /coupons/apply-discount`. The coupon is mandatory here.
pub async fn compute_price(
    store: &dyn Store,
    request: &PriceQuoteRequest,
    add_on_policy: AddOnPolicy,
    now: DateTime<Utc>,
) -> AppResult<PriceBreakdown> {
    let code = request.coupon_code.trim();
    if code.is_empty() {
        return Err(AppError::ValidationError("couponCode is required".to_string()));
    }
    let party = Party {
        catalog_item_id: request.catalog_item_id,
        buyer_email: &request.buyer_email,
        adult_count: request.adult_count,
        child_count: request.child_count,
        add_ons: &request.add_ons,
    };
    Ok(price_order(store, &party, Some(code), add_on_policy, now)
        .await?
        .breakdown)
}
