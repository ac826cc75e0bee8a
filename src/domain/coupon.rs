//! Coupon eligibility
//!
//! Checkout treats an ineligible coupon as absent rather than failing the
//! request; the rejection reason is only logged. These rules decide
//! eligibility, the route decides what to do with a rejection.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::value_objects::{Discount, DiscountKind};
use crate::error::ApiResult;
use crate::models::Coupon;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CouponRejection {
    Inactive,
    Expired,
    BelowMinimum,
    UsageExhausted,
    NotApplicable,
}

impl CouponRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Expired => "expired",
            Self::BelowMinimum => "below minimum order value",
            Self::UsageExhausted => "usage limit reached",
            Self::NotApplicable => "not applicable to these items",
        }
    }
}

/// Check a coupon against the order being priced. `product_ids` and
/// `categories` describe the order lines, used for seller-scoped coupons.
pub fn check_eligibility(
    coupon: &Coupon,
    subtotal: Decimal,
    product_ids: &[Uuid],
    categories: &[String],
    now: DateTime<Utc>,
) -> Result<(), CouponRejection> {
    if coupon.status != "active" {
        return Err(CouponRejection::Inactive);
    }
    if coupon.expires_at.is_some_and(|expiry| expiry <= now) {
        return Err(CouponRejection::Expired);
    }
    if coupon.min_order_value.is_some_and(|minimum| subtotal < minimum) {
        return Err(CouponRejection::BelowMinimum);
    }
    if coupon.usage_limit.is_some_and(|limit| coupon.usage_count >= limit) {
        return Err(CouponRejection::UsageExhausted);
    }
    if coupon.product_specific && !product_ids.iter().any(|id| coupon.product_ids.contains(id)) {
        return Err(CouponRejection::NotApplicable);
    }
    if coupon.category_specific
        && !categories.iter().any(|category| coupon.categories.contains(category))
    {
        return Err(CouponRejection::NotApplicable);
    }
    Ok(())
}

/// Discount amount for an eligible coupon, capped at the subtotal.
pub fn discount_amount(coupon: &Coupon, subtotal: Decimal) -> ApiResult<Decimal> {
    let kind = DiscountKind::parse(&coupon.kind)?;
    Ok(Discount::new(kind, coupon.value)?.off_subtotal(subtotal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn coupon() -> Coupon {
        Coupon {
            id: Uuid::new_v4(),
            code: "SAVE10".into(),
            kind: "percentage".into(),
            value: dec!(10),
            min_order_value: Some(dec!(50)),
            usage_limit: Some(100),
            usage_count: 0,
            expires_at: Some(Utc::now() + Duration::days(7)),
            seller_id: None,
            product_specific: false,
            product_ids: vec![],
            category_specific: false,
            categories: vec![],
            status: "active".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn eligible_coupon_discounts_subtotal() {
        let c = coupon();
        assert!(check_eligibility(&c, dec!(60), &[], &[], Utc::now()).is_ok());
        assert_eq!(discount_amount(&c, dec!(60)).unwrap(), dec!(6.00));
    }

    #[test]
    fn below_minimum_rejected() {
        let c = coupon();
        assert_eq!(
            check_eligibility(&c, dec!(40), &[], &[], Utc::now()),
            Err(CouponRejection::BelowMinimum)
        );
    }

    #[test]
    fn expired_rejected() {
        let mut c = coupon();
        c.expires_at = Some(Utc::now() - Duration::hours(1));
        assert_eq!(
            check_eligibility(&c, dec!(60), &[], &[], Utc::now()),
            Err(CouponRejection::Expired)
        );
    }

    #[test]
    fn usage_limit_rejected() {
        let mut c = coupon();
        c.usage_limit = Some(3);
        c.usage_count = 3;
        assert_eq!(
            check_eligibility(&c, dec!(60), &[], &[], Utc::now()),
            Err(CouponRejection::UsageExhausted)
        );
    }

    #[test]
    fn inactive_rejected() {
        let mut c = coupon();
        c.status = "inactive".into();
        assert_eq!(
            check_eligibility(&c, dec!(60), &[], &[], Utc::now()),
            Err(CouponRejection::Inactive)
        );
    }

    #[test]
    fn product_restriction_must_match_a_line() {
        let mut c = coupon();
        let target = Uuid::new_v4();
        c.product_specific = true;
        c.product_ids = vec![target];
        assert_eq!(
            check_eligibility(&c, dec!(60), &[Uuid::new_v4()], &[], Utc::now()),
            Err(CouponRejection::NotApplicable)
        );
        assert!(check_eligibility(&c, dec!(60), &[target], &[], Utc::now()).is_ok());
    }

    #[test]
    fn category_restriction_must_match_a_line() {
        let mut c = coupon();
        c.category_specific = true;
        c.categories = vec!["electronics".into()];
        assert_eq!(
            check_eligibility(&c, dec!(60), &[], &["toys".into()], Utc::now()),
            Err(CouponRejection::NotApplicable)
        );
        assert!(check_eligibility(&c, dec!(60), &[], &["electronics".into()], Utc::now()).is_ok());
    }

    #[test]
    fn fixed_coupon_capped_at_subtotal() {
        let mut c = coupon();
        c.kind = "fixed".into();
        c.value = dec!(80);
        c.min_order_value = None;
        assert_eq!(discount_amount(&c, dec!(60)).unwrap(), dec!(60));
    }
}
