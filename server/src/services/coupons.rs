use chrono::{DateTime, Utc};
use std::collections::HashSet;
use uuid::Uuid;

use crate::models::{Coupon, CouponStatus, DiscountRule, NewCoupon};
use crate::store::Store;
use crate::utils::{AppError, AppResult};

fn validate(new: &NewCoupon) -> AppResult<()> {
    if new.code.trim().is_empty() {
        return Err(AppError::ValidationError("code is required".to_string()));
    }
    if new.catalog_item_ids.is_empty() {
        return Err(AppError::ValidationError(
            "at least one catalog item id is required".to_string(),
        ));
    }
    if i32::try_from(new.usage_limit_per_user).is_err() {
        return Err(AppError::ValidationError(
            "usageLimitPerUser is too large".to_string(),
        ));
    }
    if new.valid_from > new.valid_to {
        return Err(AppError::ValidationError(
            "validFrom must not be after validTo".to_string(),
        ));
    }
    for (party, rule) in [("adult", new.adult_discount), ("child", new.child_discount)] {
        if let Some(rule) = rule {
            if !rule.is_valid() {
                return Err(AppError::ValidationError(format!(
                    "{party} discount is out of range"
                )));
            }
        }
    }
    Ok(())
}

/// Creates one coupon per catalog item, all sharing the same code. Either every
/// record is written or none is.
pub async fn create_coupons(
    store: &dyn Store,
    new: NewCoupon,
    now: DateTime<Utc>,
) -> AppResult<Vec<Coupon>> {
    validate(&new)?;

    let code = new.code.trim().to_string();
    let mut seen = HashSet::new();
    let coupons: Vec<Coupon> = new
        .catalog_item_ids
        .iter()
        .filter(|id| seen.insert(**id))
        .map(|catalog_item_id| Coupon {
            id: Uuid::new_v4(),
            code: code.clone(),
            catalog_item_id: *catalog_item_id,
            valid_from: new.valid_from,
            valid_to: new.valid_to,
            adult_discount: new.adult_discount.unwrap_or_else(DiscountRule::none),
            child_discount: new.child_discount.unwrap_or_else(DiscountRule::none),
            usage_limit_per_user: new.usage_limit_per_user,
            status: CouponStatus::Active,
            created_at: now,
            updated_at: now,
        })
        .collect();

    store.insert_coupons(&coupons).await?;
    tracing::info!(code = %code, items = coupons.len(), "Coupons created");
    Ok(coupons)
}

pub async fn list_coupons(
    store: &dyn Store,
    catalog_item_id: Option<Uuid>,
) -> AppResult<Vec<Coupon>> {
    Ok(store.list_coupons(catalog_item_id).await?)
}

/// Toggles a coupon between active and canceled.
pub async fn set_coupon_status(
    store: &dyn Store,
    id: Uuid,
    status: CouponStatus,
    now: DateTime<Utc>,
) -> AppResult<Coupon> {
    if status == CouponStatus::Expired {
        return Err(AppError::ValidationError(
            "status must be active or canceled".to_string(),
        ));
    }
    let coupon = store
        .set_coupon_status(id, status, now)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Coupon {id} not found")))?;
    tracing::info!(coupon_id = %id, status = %status, "Coupon status changed");
    Ok(coupon)
}

pub async fn delete_coupon(store: &dyn Store, id: Uuid) -> AppResult<()> {
    if !store.delete_coupon(id).await? {
        return Err(AppError::NotFound(format!("Coupon {id} not found")));
    }
    tracing::info!(coupon_id = %id, "Coupon deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DiscountKind;
    use crate::store::MemoryStore;
    use chrono::Duration;
    use rust_decimal::Decimal;

    fn new_coupon(items: Vec<Uuid>) -> NewCoupon {
        let now = Utc::now();
        NewCoupon {
            code: " WINTER ".to_string(),
            catalog_item_ids: items,
            valid_from: now,
            valid_to: now + Duration::days(30),
            adult_discount: Some(DiscountRule {
                kind: DiscountKind::Percentage,
                value: Decimal::from(15),
            }),
            child_discount: None,
            usage_limit_per_user: 2,
        }
    }

    #[tokio::test]
    async fn test_fan_out_one_record_per_item() {
        let store = MemoryStore::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let created = create_coupons(&store, new_coupon(vec![a, b, a]), Utc::now())
            .await
            .unwrap();

        assert_eq!(created.len(), 2);
        assert!(created.iter().all(|c| c.code == "WINTER"));
        assert_eq!(created[0].child_discount, DiscountRule::none());
        assert_eq!(list_coupons(&store, Some(b)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_code_for_item_writes_nothing() {
        let store = MemoryStore::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        create_coupons(&store, new_coupon(vec![a]), Utc::now())
            .await
            .unwrap();

        let err = create_coupons(&store, new_coupon(vec![b, a]), Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(list_coupons(&store, Some(b)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_inverted_window_and_bad_percentage() {
        let store = MemoryStore::new();
        let mut inverted = new_coupon(vec![Uuid::new_v4()]);
        std::mem::swap(&mut inverted.valid_from, &mut inverted.valid_to);
        assert!(create_coupons(&store, inverted, Utc::now()).await.is_err());

        let mut too_much = new_coupon(vec![Uuid::new_v4()]);
        too_much.adult_discount = Some(DiscountRule {
            kind: DiscountKind::Percentage,
            value: Decimal::from(150),
        });
        let err = create_coupons(&store, too_much, Utc::now()).await.unwrap_err();
        assert!(err.to_string().contains("adult discount"));

        let mut unbounded = new_coupon(vec![Uuid::new_v4()]);
        unbounded.usage_limit_per_user = u32::MAX;
        let err = create_coupons(&store, unbounded, Utc::now()).await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_toggle_and_delete() {
        let store = MemoryStore::new();
        let created = create_coupons(&store, new_coupon(vec![Uuid::new_v4()]), Utc::now())
            .await
            .unwrap();
        let id = created[0].id;

        let canceled = set_coupon_status(&store, id, CouponStatus::Canceled, Utc::now())
            .await
            .unwrap();
        assert_eq!(canceled.status, CouponStatus::Canceled);
        assert!(
            set_coupon_status(&store, id, CouponStatus::Expired, Utc::now())
                .await
                .is_err()
        );

        delete_coupon(&store, id).await.unwrap();
        let err = delete_coupon(&store, id).await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }
}
