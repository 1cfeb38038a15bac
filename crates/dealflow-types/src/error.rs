//! Error types for the Dealflow settlement core.
//!
//! All errors use the `DF_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by kind:
//! - 1xx: Entity lookup errors
//! - 2xx: Input validation errors
//! - 3xx: State machine errors
//! - 4xx: Funds errors
//! - 5xx: Settlement reconciliation errors
//! - 6xx: Idempotency errors
//! - 9xx: General / internal errors

use rust_decimal::Decimal;
use thiserror::Error;

use crate::{DealId, ValidationReason};

/// Central error enum for all Dealflow operations.
///
/// Callers branch on the variant; the rendered message is for logs only.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DealflowError {
    // =================================================================
    // Lookup Errors (1xx)
    // =================================================================
    /// The requested entity does not exist.
    #[error("DF_ERR_100: {kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    // =================================================================
    // Validation Errors (2xx)
    // =================================================================
    /// Malformed or out-of-range input (non-positive amount, bad currency,
    /// unknown linked entity, ...).
    #[error("DF_ERR_200: Validation failed: {reason}")]
    Validation { reason: String },

    // =================================================================
    // State Machine Errors (3xx)
    // =================================================================
    /// The operation is not permitted from the entity's current status.
    #[error(
        "DF_ERR_300: Cannot {action} {entity}: status is {current}, requires {required}"
    )]
    InvalidStateTransition {
        entity: String,
        action: &'static str,
        current: String,
        required: String,
    },

    // =================================================================
    // Funds Errors (4xx)
    // =================================================================
    /// A withdrawal or hold exceeds the available balance.
    #[error("DF_ERR_400: Insufficient funds: need {needed}, available {available}")]
    InsufficientFunds { needed: Decimal, available: Decimal },

    // =================================================================
    // Settlement Errors (5xx)
    // =================================================================
    /// Deposits and disbursements do not reconcile.
    #[error(
        "DF_ERR_500: Settlement incomplete: {} reason(s), first: {}",
        .reasons.len(),
        first_code(.reasons)
    )]
    IncompleteSettlement { reasons: Vec<ValidationReason> },

    /// A Deal cannot complete while some of its Steps are not COMPLETED.
    #[error("DF_ERR_501: Deal {deal_id} has {pending} step(s) not completed")]
    IncompleteSteps { deal_id: DealId, pending: usize },

    // =================================================================
    // Idempotency Errors (6xx)
    // =================================================================
    /// The idempotency key was already used with a different payload.
    #[error("DF_ERR_600: Idempotency key {key} reused with a different payload")]
    DuplicateRequest { key: String },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error (poisoned lock, broken index).
    #[error("DF_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("DF_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config file, missing fields, etc.).
    #[error("DF_ERR_902: Configuration error: {0}")]
    Configuration(String),
}

impl DealflowError {
    /// Shorthand for [`DealflowError::NotFound`].
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Shorthand for [`DealflowError::Validation`].
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`DealflowError::InvalidStateTransition`].
    pub fn invalid_transition(
        entity: impl Into<String>,
        action: &'static str,
        current: impl ToString,
        required: impl Into<String>,
    ) -> Self {
        Self::InvalidStateTransition {
            entity: entity.into(),
            action,
            current: current.to_string(),
            required: required.into(),
        }
    }
}

fn first_code(reasons: &[ValidationReason]) -> &'static str {
    reasons.first().map_or("none", |r| r.code.as_str())
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, DealflowError>;

impl From<serde_json::Error> for DealflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
