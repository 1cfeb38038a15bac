//! Settlement reconciliation report types.
//!
//! The validator never fails on a structurally valid but unready deal; it
//! returns a [`SettlementReport`] listing every [`ValidationReason`] found.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::StepId;

/// Machine-readable reason a Deal is not ready for payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    DealNotFound,
    NoStepsInDeal,
    NoDeponentsInStep,
    NoRecipientsInStep,
    InsufficientDeposits,
}

impl ReasonCode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DealNotFound => "DEAL_NOT_FOUND",
            Self::NoStepsInDeal => "NO_STEPS_IN_DEAL",
            Self::NoDeponentsInStep => "NO_DEPONENTS_IN_STEP",
            Self::NoRecipientsInStep => "NO_RECIPIENTS_IN_STEP",
            Self::InsufficientDeposits => "INSUFFICIENT_DEPOSITS",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured context attached to a reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReasonDetails {
    /// Deposit shortfall on one step.
    Deposits {
        #[serde(rename = "stepId")]
        step_id: StepId,
        #[serde(rename = "totalDeposited")]
        total_deposited: Decimal,
        #[serde(rename = "totalRequired")]
        total_required: Decimal,
    },
    /// A problem scoped to one step.
    Step {
        #[serde(rename = "stepId")]
        step_id: StepId,
    },
}

/// One reason a Deal is not valid for payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReason {
    pub code: ReasonCode,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<ReasonDetails>,
}

impl ValidationReason {
    #[must_use]
    pub fn new(code: ReasonCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
            details: None,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: ReasonDetails) -> Self {
        self.details = Some(details);
        self
    }
}

/// Result of reconciling a Deal's deposits against its disbursements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementReport {
    /// `true` exactly when `reasons` is empty.
    pub is_valid: bool,
    pub reasons: Vec<ValidationReason>,
}

impl SettlementReport {
    #[must_use]
    pub fn from_reasons(reasons: Vec<ValidationReason>) -> Self {
        Self {
            is_valid: reasons.is_empty(),
            reasons,
        }
    }

    /// Codes in report order.
    #[must_use]
    pub fn codes(&self) -> Vec<ReasonCode> {
        self.reasons.iter().map(|r| r.code).collect()
    }
}

/// Deposit and disbursement sums for one Step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTotals {
    pub deposited: Decimal,
    pub required: Decimal,
}

impl StepTotals {
    #[must_use]
    pub fn is_covered(&self) -> bool {
        self.deposited >= self.required
    }
}
