use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscountKind {
    Percentage,
    Flat,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiscountRule {
    #[serde(rename = "type")]
    pub kind: DiscountKind,
    pub value: Decimal,
}

impl DiscountRule {
    pub fn none() -> Self {
        Self {
            kind: DiscountKind::Flat,
            value: Decimal::ZERO,
        }
    }

    pub fn is_valid(&self) -> bool {
        match self.kind {
            DiscountKind::Percentage => {
                self.value >= Decimal::ZERO && self.value <= Decimal::ONE_HUNDRED
            }
            DiscountKind::Flat => self.value >= Decimal::ZERO,
        }
    }

    /// Discount granted on `base`. Flat amounts apply once per order.
    pub fn amount_on(&self, base: Decimal) -> Decimal {
        match self.kind {
            DiscountKind::Percentage => base * self.value / Decimal::ONE_HUNDRED,
            DiscountKind::Flat => self.value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CouponStatus {
    Active,
    Canceled,
    Expired,
}

impl CouponStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CouponStatus::Active => "active",
            CouponStatus::Canceled => "canceled",
            CouponStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for CouponStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CouponStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(CouponStatus::Active),
            "canceled" | "cancelled" => Ok(CouponStatus::Canceled),
            "expired" => Ok(CouponStatus::Expired),
            other => Err(format!("unknown coupon status '{other}'")),
        }
    }
}

/// A discount rule scoped to exactly one catalog item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coupon {
    pub id: Uuid,
    pub code: String,
    pub catalog_item_id: Uuid,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub adult_discount: DiscountRule,
    pub child_discount: DiscountRule,
    /// Zero means unlimited.
    pub usage_limit_per_user: u32,
    pub status: CouponStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Coupon {
    /// Inclusive window check.
    pub fn is_within_window(&self, now: DateTime<Utc>) -> bool {
        now >= self.valid_from && now <= self.valid_to
    }

    pub fn limit_reached(&self, prior_uses: u64) -> bool {
        self.usage_limit_per_user != 0 && prior_uses >= u64::from(self.usage_limit_per_user)
    }
}

/// Creation payload; fans out into one [`Coupon`] per catalog item.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCoupon {
    pub code: String,
    pub catalog_item_ids: Vec<Uuid>,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub adult_discount: Option<DiscountRule>,
    pub child_discount: Option<DiscountRule>,
    #[serde(default)]
    pub usage_limit_per_user: u32,
}
