//! Payment records: the disbursement of one Step, as a list of transfer legs.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{DealId, PaymentId, StepId, TransferId};

/// Lifecycle status of a Payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Direction of a leg relative to the step escrow account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LegKind {
    /// Deponent account → step escrow.
    Deposit,
    /// Step escrow → recipient payout account.
    Disbursement,
}

/// One transfer within a Payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentLeg {
    pub kind: LegKind,
    /// Deponent or Recipient id, depending on `kind`.
    pub member_id: Uuid,
    /// The transfer currently carrying this leg.
    pub transfer_id: TransferId,
    /// Incremented when the leg is re-issued to a new destination.
    pub revision: u32,
}

/// Disbursement of one Step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub deal_id: DealId,
    pub step_id: StepId,
    pub status: PaymentStatus,
    /// Deposit legs first, then disbursement legs.
    pub legs: Vec<PaymentLeg>,
    pub failure_reason: Option<String>,
    /// Caller key the payment was created under.
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Idempotency payload for a disbursement request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub deal_id: DealId,
    pub step_id: StepId,
}
