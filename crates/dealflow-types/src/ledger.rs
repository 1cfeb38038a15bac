//! Balance and Hold types for the Dealflow ledger.
//!
//! Every account has a total `amount` and a `holds` sum reserved by ACTIVE
//! [`Hold`]s. New reservations and withdrawals draw on
//! `available = amount - holds`.
//!
//! ## Hold State Machine
//!
//! ```text
//!   ┌────────┐  execute   ┌──────────┐
//!   │ ACTIVE ├───────────▶│ EXECUTED │
//!   └───┬────┘            └──────────┘
//!       │ release / expire
//!       ▼
//!   ┌──────────┐
//!   │ RELEASED │
//!   └──────────┘
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{BeneficiaryId, Currency, DealId, HoldId, StepId, constants};

// ---------------------------------------------------------------------------
// Party / AccountRef
// ---------------------------------------------------------------------------

/// Who owns a ledger account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum Party {
    Beneficiary(BeneficiaryId),
    Deal(DealId),
    Step(StepId),
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Beneficiary(id) => write!(f, "{id}"),
            Self::Deal(id) => write!(f, "{id}"),
            Self::Step(id) => write!(f, "{id}"),
        }
    }
}

/// Key of a single Balance: a party plus a named account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct AccountRef {
    pub party: Party,
    pub account: String,
}

impl AccountRef {
    #[must_use]
    pub fn new(party: Party, account: impl Into<String>) -> Self {
        Self {
            party,
            account: account.into(),
        }
    }

    /// A beneficiary's primary account.
    #[must_use]
    pub fn beneficiary(id: BeneficiaryId) -> Self {
        Self::new(Party::Beneficiary(id), constants::DEFAULT_ACCOUNT)
    }

    /// The escrow account of a Step.
    #[must_use]
    pub fn step_escrow(id: StepId) -> Self {
        Self::new(Party::Step(id), constants::ESCROW_ACCOUNT)
    }
}

impl fmt::Display for AccountRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.party, self.account)
    }
}

// ---------------------------------------------------------------------------
// Balance
// ---------------------------------------------------------------------------

/// Funds held on one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub account: AccountRef,
    pub currency: Currency,
    /// Total funds on the account.
    pub amount: Decimal,
    /// Sum of ACTIVE holds.
    pub holds: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Balance {
    /// Create a zero balance.
    #[must_use]
    pub fn new(account: AccountRef, currency: Currency) -> Self {
        let now = Utc::now();
        Self {
            account,
            currency,
            amount: Decimal::ZERO,
            holds: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    /// Funds not reserved by an ACTIVE hold.
    #[must_use]
    pub fn available(&self) -> Decimal {
        self.amount - self.holds
    }

    /// `amount >= holds >= 0`.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.holds >= Decimal::ZERO && self.amount >= self.holds
    }
}

// ---------------------------------------------------------------------------
// Hold
// ---------------------------------------------------------------------------

/// The lifecycle state of a Hold.
///
/// Transitions are **monotonic**: `Active → Released` or `Active → Executed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HoldStatus {
    /// Funds reserved against `available`.
    Active,
    /// Reservation dropped; no balance change.
    Released,
    /// Reserved funds withdrawn from the balance.
    Executed,
}

impl HoldStatus {
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        matches!((self, target), (Self::Active, Self::Released | Self::Executed))
    }
}

impl fmt::Display for HoldStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "ACTIVE"),
            Self::Released => write!(f, "RELEASED"),
            Self::Executed => write!(f, "EXECUTED"),
        }
    }
}

/// A reservation against a Balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hold {
    pub id: HoldId,
    pub account: AccountRef,
    pub amount: Decimal,
    pub currency: Currency,
    pub reason: String,
    pub status: HoldStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// When the hold was released or executed.
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Hold {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == HoldStatus::Active
    }

    /// An ACTIVE hold whose expiry is at or before `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.expires_at.is_some_and(|exp| exp <= now)
    }

    /// Attempt to transition to `target`, stamping the resolution time.
    ///
    /// # Errors
    /// Returns `InvalidStateTransition` if the hold is not ACTIVE.
    pub fn transition(&mut self, target: HoldStatus, action: &'static str) -> crate::Result<()> {
        if !self.status.can_transition_to(target) {
            return Err(crate::DealflowError::invalid_transition(
                self.id.to_string(),
                action,
                self.status,
                "ACTIVE",
            ));
        }
        self.status = target;
        self.resolved_at = Some(Utc::now());
        Ok(())
    }
}

/// Read model returned by the balance info query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceInfo {
    pub balance: Balance,
    /// `balance.amount - heldAmount`.
    pub available_amount: Decimal,
    /// Sum of ACTIVE holds.
    pub held_amount: Decimal,
    /// Number of holds ever placed on the account, in any status.
    pub total_holds: usize,
    pub active_holds: Vec<Hold>,
}
