//! Transfer records: point-to-point money movement between two accounts.
//!
//! ## State Machine
//!
//! ```text
//!   ┌─────────┐ execute ok ┌───────────┐
//!   │ PENDING ├───────────▶│ COMPLETED │
//!   └─┬──▲──┬─┘            └───────────┘
//!     │  │  │ execute err
//!     │  │  ▼
//!     │  │ ┌────────┐
//!     │  └─┤ FAILED │  (retry → PENDING)
//!     │    └───┬────┘
//!     ▼        ▼ cancel
//!   ┌───────────┐
//!   │ CANCELLED │
//!   └───────────┘
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{AccountRef, Currency, TransferId};

/// Lifecycle status of a Transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl TransferStatus {
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Completed | Self::Failed | Self::Cancelled)
                | (Self::Failed, Self::Pending | Self::Cancelled)
        )
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Caller input for creating a Transfer. Also the idempotency payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub from: AccountRef,
    pub to: AccountRef,
    pub amount: Decimal,
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A money movement between two ledger accounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,
    pub from: AccountRef,
    pub to: AccountRef,
    pub amount: Decimal,
    pub currency: Currency,
    pub description: Option<String>,
    pub status: TransferStatus,
    pub failure_reason: Option<String>,
    /// Number of execution attempts started.
    pub attempts: u32,
    /// Set once the sender was debited. A later attempt only credits.
    pub debited_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Transfer {
    /// The sender was debited but the recipient was never credited.
    #[must_use]
    pub fn awaits_credit(&self) -> bool {
        self.debited_at.is_some() && self.status != TransferStatus::Completed
    }
}

/// Machine-readable reason a transfer is not currently possible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferIssue {
    SameAccount,
    NonPositiveAmount,
    InvalidCurrency,
    SenderBalanceNotFound,
    SenderCurrencyMismatch,
    RecipientCurrencyMismatch,
    InsufficientFunds,
}

/// One reason reported by the transfer possibility check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCheckReason {
    pub code: TransferIssue,
    pub description: String,
}

/// Result of a read-only transfer possibility check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferCheck {
    pub is_possible: bool,
    pub reasons: Vec<TransferCheckReason>,
}

impl TransferCheck {
    #[must_use]
    pub fn from_reasons(reasons: Vec<TransferCheckReason>) -> Self {
        Self {
            is_possible: reasons.is_empty(),
            reasons,
        }
    }

    #[must_use]
    pub fn has(&self, issue: TransferIssue) -> bool {
        self.reasons.iter().any(|r| r.code == issue)
    }
}
