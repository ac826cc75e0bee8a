//! Refund state machine

use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefundStatus {
    Pending,
    Approved,
    Rejected,
    Refunded,
}

impl RefundStatus {
    pub fn parse(raw: &str) -> ApiResult<Self> {
        match raw.trim().to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "refunded" => Ok(Self::Refunded),
            other => Err(ApiError::bad_request(format!("unknown refund status: {other}"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Refunded => "refunded",
        }
    }

    /// `pending -> {approved, rejected}`; `approved -> refunded`;
    /// `refunded` and `rejected` are terminal.
    pub fn can_transition(self, to: RefundStatus) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Approved)
                | (Self::Pending, Self::Rejected)
                | (Self::Approved, Self::Refunded)
        )
    }

    pub fn transition(self, to: RefundStatus) -> ApiResult<RefundStatus> {
        if self.can_transition(to) {
            Ok(to)
        } else {
            Err(ApiError::bad_request(format!(
                "cannot move refund from {} to {}",
                self.as_str(),
                to.as_str()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approval_path() {
        assert!(RefundStatus::Pending.can_transition(RefundStatus::Approved));
        assert!(RefundStatus::Approved.can_transition(RefundStatus::Refunded));
    }

    #[test]
    fn refunded_is_terminal() {
        for target in [
            RefundStatus::Pending,
            RefundStatus::Approved,
            RefundStatus::Rejected,
            RefundStatus::Refunded,
        ] {
            assert!(RefundStatus::Refunded.transition(target).is_err());
        }
    }

    #[test]
    fn rejected_cannot_be_refunded() {
        assert!(!RefundStatus::Rejected.can_transition(RefundStatus::Refunded));
    }
}
