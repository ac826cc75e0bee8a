//! Value objects

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};

/// Round to two decimal places, midpoint away from zero.
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscountKind {
    Percentage,
    Fixed,
}

impl DiscountKind {
    pub fn parse(raw: &str) -> ApiResult<Self> {
        match raw.trim().to_lowercase().as_str() {
            "percentage" => Ok(Self::Percentage),
            "fixed" => Ok(Self::Fixed),
            other => Err(ApiError::bad_request(format!("unknown discount type: {other}"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Percentage => "percentage",
            Self::Fixed => "fixed",
        }
    }
}

/// A discount annotation, as stored on products and coupons.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Discount {
    pub kind: DiscountKind,
    pub value: Decimal,
}

impl Discount {
    pub fn new(kind: DiscountKind, value: Decimal) -> ApiResult<Self> {
        if value < Decimal::ZERO {
            return Err(ApiError::bad_request("discount value must not be negative"));
        }
        Ok(Self { kind, value })
    }

    /// Discount taken off a single unit. A fixed discount never exceeds the
    /// unit price.
    pub fn per_unit(&self, unit_price: Decimal) -> Decimal {
        let amount = match self.kind {
            DiscountKind::Percentage => unit_price * self.value / Decimal::from(100),
            DiscountKind::Fixed => self.value.min(unit_price),
        };
        round2(amount.max(Decimal::ZERO))
    }

    /// Discount taken off an order subtotal, capped at the subtotal.
    pub fn off_subtotal(&self, subtotal: Decimal) -> Decimal {
        let amount = match self.kind {
            DiscountKind::Percentage => subtotal * self.value / Decimal::from(100),
            DiscountKind::Fixed => self.value,
        };
        round2(amount.clamp(Decimal::ZERO, subtotal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn percentage_per_unit() {
        let d = Discount::new(DiscountKind::Percentage, dec!(10)).unwrap();
        assert_eq!(d.per_unit(dec!(20)), dec!(2.00));
    }

    #[test]
    fn fixed_per_unit_capped_at_price() {
        let d = Discount::new(DiscountKind::Fixed, dec!(25)).unwrap();
        assert_eq!(d.per_unit(dec!(20)), dec!(20));
        assert_eq!(d.per_unit(dec!(30)), dec!(25));
    }

    #[test]
    fn subtotal_discount_capped() {
        let d = Discount::new(DiscountKind::Fixed, dec!(100)).unwrap();
        assert_eq!(d.off_subtotal(dec!(60)), dec!(60));
        let p = Discount::new(DiscountKind::Percentage, dec!(10)).unwrap();
        assert_eq!(p.off_subtotal(dec!(60)), dec!(6.00));
    }

    #[test]
    fn negative_value_rejected() {
        assert!(Discount::new(DiscountKind::Fixed, dec!(-1)).is_err());
    }

    #[test]
    fn round2_midpoint() {
        assert_eq!(round2(dec!(2.345)), dec!(2.35));
        assert_eq!(round2(dec!(2.344)), dec!(2.34));
    }
}
