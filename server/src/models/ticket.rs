use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::catalog::AddOnSelection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentMethod {
    #[serde(rename = "qpay")]
    Qpay,
    #[serde(rename = "cybersource")]
    Cybersource,
    #[serde(rename = "mastercard-mpgs")]
    MastercardMpgs,
    #[serde(rename = "skipcash")]
    Skipcash,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Qpay => "qpay",
            PaymentMethod::Cybersource => "cybersource",
            PaymentMethod::MastercardMpgs => "mastercard-mpgs",
            PaymentMethod::Skipcash => "skipcash",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "qpay" => Ok(PaymentMethod::Qpay),
            "cybersource" => Ok(PaymentMethod::Cybersource),
            "mastercard-mpgs" | "mpgs" => Ok(PaymentMethod::MastercardMpgs),
            "skipcash" => Ok(PaymentMethod::Skipcash),
            other => Err(format!("unknown payment method '{other}'")),
        }
    }
}

/// Payment state of a ticket.
///
/// ```text
/// Pending -> Paid | Failed | Cancelled
/// Paid -> RefundProcessing | RefundRejectedByOperator
/// RefundProcessing -> RefundCompleted | RefundRejectedByOperator
/// ```
///
/// Older records spell the refund-in-flight state several ways; all of them
/// read back as `RefundProcessing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Cancelled,
    #[serde(
        alias = "RefundInitiated",
        alias = "Refund Initiated",
        alias = "Refund Processing"
    )]
    RefundProcessing,
    RefundCompleted,
    RefundRejectedByOperator,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "Pending",
            PaymentStatus::Paid => "Paid",
            PaymentStatus::Failed => "Failed",
            PaymentStatus::Cancelled => "Cancelled",
            PaymentStatus::RefundProcessing => "RefundProcessing",
            PaymentStatus::RefundCompleted => "RefundCompleted",
            PaymentStatus::RefundRejectedByOperator => "RefundRejectedByOperator",
        }
    }

    /// Edges of the payment state machine.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Pending, Paid)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Paid, RefundProcessing)
                | (Paid, RefundRejectedByOperator)
                | (RefundProcessing, RefundCompleted)
                | (RefundProcessing, RefundRejectedByOperator)
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "Pending" => Ok(PaymentStatus::Pending),
            "Paid" => Ok(PaymentStatus::Paid),
            "Failed" => Ok(PaymentStatus::Failed),
            "Cancelled" => Ok(PaymentStatus::Cancelled),
            "RefundProcessing" | "RefundInitiated" | "Refund Initiated" | "Refund Processing" => {
                Ok(PaymentStatus::RefundProcessing)
            }
            "RefundCompleted" => Ok(PaymentStatus::RefundCompleted),
            "RefundRejectedByOperator" => Ok(PaymentStatus::RefundRejectedByOperator),
            other => Err(format!("unknown payment status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketStatus {
    Booked,
    Cancelled,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Booked => "Booked",
            TicketStatus::Cancelled => "Cancelled",
        }
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Booked" => Ok(TicketStatus::Booked),
            "Cancelled" => Ok(TicketStatus::Cancelled),
            other => Err(format!("unknown ticket status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: Uuid,
    /// Buyer-facing booking reference.
    pub unique_id: String,
    pub catalog_item_id: Uuid,
    pub buyer_email: String,
    pub adult_count: u32,
    pub child_count: u32,
    pub add_on_selections: Vec<AddOnSelection>,
    pub coupon_id: Option<Uuid>,
    pub price: Decimal,
    pub payment_method: PaymentMethod,
    /// QPay PUN or CyberSource confirmation id.
    pub provider_transaction_ref: Option<String>,
    pub refund_provider_ref: Option<String>,
    pub status: TicketStatus,
    pub payment_status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Buyer emails are compared case-insensitively.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_refund_spellings_unify() {
        for raw in [
            "\"Refund Initiated\"",
            "\"RefundInitiated\"",
            "\"Refund Processing\"",
            "\"RefundProcessing\"",
        ] {
            let status: PaymentStatus = serde_json::from_str(raw).unwrap();
            assert_eq!(status, PaymentStatus::RefundProcessing);
        }
        assert_eq!(
            "Refund Initiated".parse::<PaymentStatus>().unwrap(),
            PaymentStatus::RefundProcessing
        );
    }

    #[test]
    fn test_state_machine_edges() {
        use PaymentStatus::*;
        assert!(Pending.can_transition_to(Paid));
        assert!(Paid.can_transition_to(RefundProcessing));
        assert!(RefundProcessing.can_transition_to(RefundCompleted));
        assert!(!Failed.can_transition_to(Paid));
        assert!(!Pending.can_transition_to(RefundProcessing));
        assert!(!RefundCompleted.can_transition_to(RefundProcessing));
    }

    #[test]
    fn test_payment_method_wire_names() {
        assert_eq!(
            serde_json::to_string(&PaymentMethod::MastercardMpgs).unwrap(),
            "\"mastercard-mpgs\""
        );
        assert_eq!(
            "CyberSource".parse::<PaymentMethod>().unwrap(),
            PaymentMethod::Cybersource
        );
    }
}
