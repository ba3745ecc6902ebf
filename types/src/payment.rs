//! Payment records and their status-history audit trail.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Confirmed,
    Failed,
}

impl PaymentStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Confirmed | PaymentStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Confirmed => "confirmed",
            PaymentStatus::Failed => "failed",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    QuickMatch,
    Tournament,
}

impl PaymentKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "quick_match" => Some(PaymentKind::QuickMatch),
            "tournament" => Some(PaymentKind::Tournament),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentKind::QuickMatch => "quick_match",
            PaymentKind::Tournament => "tournament",
        }
    }
}

/// One locally-initiated payment attempt, keyed by the client-supplied
/// `reference`. Created in `pending` and mutated only by the confirm/fail
/// transition. Never deleted (audit trail).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub payment_id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tournament_id: Option<String>,
    /// Client-generated idempotency key. Unique across all payments.
    pub reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    /// Canonical lowercase token contract address.
    pub token_address: String,
    /// Integer base units, as a decimal string.
    pub token_amount: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_address: Option<String>,
    pub status: PaymentStatus,
    pub kind: PaymentKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nullifier_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<u64>,
}

/// Append-only history row; one per status transition, including the
/// initial pending entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentStatusHistoryRecord {
    pub payment_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_status: Option<PaymentStatus>,
    pub new_status: PaymentStatus,
    pub changed_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
