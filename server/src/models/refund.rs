use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::ticket::PaymentMethod;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefundStatus {
    PendingApproval,
    ProcessingRefund,
    Rejected,
    Completed,
}

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundStatus::PendingApproval => "PendingApproval",
            RefundStatus::ProcessingRefund => "ProcessingRefund",
            RefundStatus::Rejected => "Rejected",
            RefundStatus::Completed => "Completed",
        }
    }

    /// At most one open request may exist per ticket.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            RefundStatus::PendingApproval | RefundStatus::ProcessingRefund
        )
    }
}

impl FromStr for RefundStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PendingApproval" => Ok(RefundStatus::PendingApproval),
            "ProcessingRefund" => Ok(RefundStatus::ProcessingRefund),
            "Rejected" => Ok(RefundStatus::Rejected),
            "Completed" => Ok(RefundStatus::Completed),
            other => Err(format!("unknown refund status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub reason: String,
    pub payment_method: PaymentMethod,
    pub status: RefundStatus,
    pub refund_amount: Decimal,
    /// Correlation id of a dispatched refund attempt, reused on retry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_correlation_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
