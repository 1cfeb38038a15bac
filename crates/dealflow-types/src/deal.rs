//! # Deal, Step, and step members
//!
//! A [`Deal`] owns an ordered list of [`Step`]s by id; each Step owns its
//! [`Deponent`]s and [`Recipient`]s by id. Records refer to their parent by
//! id only, so the aggregate is an arena of records rather than a graph of
//! pointers.
//!
//! ## Deal State Machine
//!
//! ```text
//!   ┌───────┐ confirm ┌───────────┐
//!   │ DRAFT ├────────▶│ CONFIRMED │
//!   └───┬───┘         └───────────┘
//!       │ accept
//!       ▼
//!   ┌──────────┐ all steps done ┌───────────┐
//!   │ ACCEPTED ├───────────────▶│ COMPLETED │
//!   └──┬────▲──┘                └───────────┘
//!      │    │ resume
//!      ▼    │
//!   ┌────────────────┐
//!   │ PAYMENT_FAILED │
//!   └────────────────┘
//!
//!   any non-COMPLETED ──cancel──▶ CANCELLED
//!   any non-COMPLETED ──move to draft──▶ DRAFT
//! ```
//!
//! CONFIRMED has no forward edge: acceptance starts from DRAFT only, so a
//! confirmed Deal is moved back to DRAFT (or cancelled) before it can be
//! accepted.
//!
//! ## Step State Machine
//!
//! ```text
//!   NEW ──start──▶ ACTIVE ──complete──▶ COMPLETED
//!    └──────cancel──┴──────▶ CANCELLED
//! ```
//!
//! A Step bound to a Payment is locked: only that Payment can finish it.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    BankDetailsId, BeneficiaryId, Currency, DealId, DeponentId, PaymentId, RecipientId, StepId,
};

// ---------------------------------------------------------------------------
// DealStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a Deal.
///
/// CONFIRMED is a dead end: it only leads back to DRAFT or to CANCELLED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DealStatus {
    /// Being assembled. Steps and members may be edited.
    Draft,
    /// Terms confirmed as reconciled; frozen for review.
    Confirmed,
    /// Accepted for execution. Steps may be started and paid out.
    Accepted,
    /// A disbursement failed; recipient bank details may be corrected.
    PaymentFailed,
    /// Every step completed. **Immutable.**
    Completed,
    /// Abandoned.
    Cancelled,
}

impl DealStatus {
    /// COMPLETED is the only status nothing can leave.
    #[must_use]
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Can a Deal in this status move to `target`?
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        match (self, target) {
            (Self::Completed, _) => false,
            (_, Self::Cancelled | Self::Draft) => true,
            (Self::Draft, Self::Confirmed | Self::Accepted) => true,
            (Self::Accepted, Self::PaymentFailed | Self::Completed) => true,
            (Self::PaymentFailed, Self::Accepted) => true,
            _ => false,
        }
    }
}

impl fmt::Display for DealStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draft => write!(f, "DRAFT"),
            Self::Confirmed => write!(f, "CONFIRMED"),
            Self::Accepted => write!(f, "ACCEPTED"),
            Self::PaymentFailed => write!(f, "PAYMENT_FAILED"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

// ---------------------------------------------------------------------------
// StepStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a Step. Never regresses from COMPLETED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    New,
    Active,
    Completed,
    Cancelled,
}

impl StepStatus {
    /// Can a Step in this status move to `target`?
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::New, Self::Active | Self::Cancelled)
                | (Self::Active, Self::Completed | Self::Cancelled)
        )
    }

    /// NEW and ACTIVE steps are still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::New | Self::Active)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "NEW"),
            Self::Active => write!(f, "ACTIVE"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

// ---------------------------------------------------------------------------
// Deal
// ---------------------------------------------------------------------------

/// Top-level escrow agreement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    pub id: DealId,
    pub title: String,
    /// Total amount of the agreement. Always > 0.
    pub amount: Decimal,
    pub currency: Currency,
    pub status: DealStatus,
    /// The beneficiary that owns the deal.
    pub beneficiary_id: BeneficiaryId,
    /// Steps in creation order. Sequence numbers live on the Steps.
    pub step_ids: Vec<StepId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Deal {
    /// Label used in error messages and logs.
    #[must_use]
    pub fn label(&self) -> String {
        self.id.to_string()
    }
}

/// Caller input for creating a Deal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDeal {
    pub title: String,
    pub amount: Decimal,
    pub currency: String,
    pub beneficiary_id: BeneficiaryId,
}

/// Partial update of a DRAFT Deal. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DealUpdate {
    pub title: Option<String>,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// An ordered phase of a Deal with its own deposit/disbursement requirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub deal_id: DealId,
    /// Unique and increasing within the Deal, starting at 1.
    pub sequence: u32,
    pub title: String,
    pub amount: Decimal,
    pub currency: Currency,
    pub status: StepStatus,
    pub deponent_ids: Vec<DeponentId>,
    pub recipient_ids: Vec<RecipientId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Payment that moved funds for this Step. Once set, the Step can only
    /// be finished by that Payment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<PaymentId>,
}

/// Caller input for creating a Step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewStep {
    pub title: String,
    pub amount: Decimal,
    pub currency: String,
}

/// Partial update of an open Step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepUpdate {
    pub title: Option<String>,
    pub amount: Option<Decimal>,
}

// ---------------------------------------------------------------------------
// Deponent / Recipient
// ---------------------------------------------------------------------------

/// A beneficiary depositing funds into a Step. One per (step, beneficiary).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deponent {
    pub id: DeponentId,
    pub step_id: StepId,
    pub beneficiary_id: BeneficiaryId,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Caller input for the deponent upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeponentInput {
    pub beneficiary_id: BeneficiaryId,
    pub amount: Decimal,
}

/// A beneficiary entitled to funds disbursed from a Step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: RecipientId,
    pub step_id: StepId,
    pub beneficiary_id: BeneficiaryId,
    pub bank_details_id: BankDetailsId,
    /// Gross disbursement amount. Counted against deposits.
    pub amount: Decimal,
    /// Tax withheld from `amount`. `0 <= tax <= amount`.
    pub tax: Decimal,
    pub purpose: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Caller input for creating a Recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipientInput {
    pub beneficiary_id: BeneficiaryId,
    pub bank_details_id: BankDetailsId,
    pub amount: Decimal,
    #[serde(default)]
    pub tax: Decimal,
    pub purpose: String,
}

/// Partial update of a Recipient while its Deal is DRAFT.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecipientUpdate {
    pub bank_details_id: Option<BankDetailsId>,
    pub amount: Option<Decimal>,
    pub tax: Option<Decimal>,
    pub purpose: Option<String>,
}
