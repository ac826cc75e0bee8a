//! Order state machine

use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn parse(raw: &str) -> ApiResult<Self> {
        match raw.trim().to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "shipped" => Ok(Self::Shipped),
            "delivered" => Ok(Self::Delivered),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(ApiError::bad_request(format!("unknown order status: {other}"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    /// `pending -> {processing, cancelled} -> shipped -> delivered`;
    /// `cancelled` is terminal and reachable only from `pending`.
    pub fn can_transition(self, to: OrderStatus) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Processing)
                | (Self::Pending, Self::Cancelled)
                | (Self::Processing, Self::Shipped)
                | (Self::Shipped, Self::Delivered)
        )
    }

    pub fn transition(self, to: OrderStatus) -> ApiResult<OrderStatus> {
        if self.can_transition(to) {
            Ok(to)
        } else {
            Err(ApiError::bad_request(format!(
                "cannot move order from {} to {}",
                self.as_str(),
                to.as_str()
            )))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cod,
    Stripe,
    Paypal,
}

impl PaymentMethod {
    pub fn parse(raw: &str) -> ApiResult<Self> {
        match raw.trim().to_lowercase().as_str() {
            "cod" => Ok(Self::Cod),
            "stripe" => Ok(Self::Stripe),
            "paypal" => Ok(Self::Paypal),
            other => Err(ApiError::bad_request(format!("unsupported payment method: {other}"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cod => "cod",
            Self::Stripe => "stripe",
            Self::Paypal => "paypal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unpaid => "unpaid",
            Self::Paid => "paid",
            Self::Refunded => "refunded",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_progress() {
        assert!(OrderStatus::Pending.can_transition(OrderStatus::Processing));
        assert!(OrderStatus::Processing.can_transition(OrderStatus::Shipped));
        assert!(OrderStatus::Shipped.can_transition(OrderStatus::Delivered));
    }

    #[test]
    fn cancel_only_from_pending() {
        assert!(OrderStatus::Pending.can_transition(OrderStatus::Cancelled));
        for status in [OrderStatus::Processing, OrderStatus::Shipped, OrderStatus::Delivered] {
            assert!(!status.can_transition(OrderStatus::Cancelled));
        }
    }

    #[test]
    fn no_backwards_or_terminal_moves() {
        assert!(!OrderStatus::Shipped.can_transition(OrderStatus::Processing));
        assert!(!OrderStatus::Delivered.can_transition(OrderStatus::Shipped));
        assert!(!OrderStatus::Cancelled.can_transition(OrderStatus::Processing));
        assert!(OrderStatus::Processing.transition(OrderStatus::Delivered).is_err());
    }

    #[test]
    fn payment_method_parse() {
        assert_eq!(PaymentMethod::parse("COD").unwrap(), PaymentMethod::Cod);
        assert!(PaymentMethod::parse("bitcoin").is_err());
    }
}
