//! # dealflow-types
//!
//! Shared types, errors, and configuration for the **Dealflow** escrow
//! settlement core.
//!
//! Every other crate in the workspace depends on this one. It defines:
//!
//! - **Identifiers**: [`DealId`], [`StepId`], [`DeponentId`], [`RecipientId`],
//!   [`TransferId`], [`HoldId`], [`PaymentId`], [`BeneficiaryId`], [`BankDetailsId`]
//! - **Money**: [`Currency`] and amount checks
//! - **Deal model**: [`Deal`], [`Step`], [`Deponent`], [`Recipient`] and their statuses
//! - **Ledger model**: [`AccountRef`], [`Party`], [`Balance`], [`Hold`], [`BalanceInfo`]
//! - **Transfer model**: [`Transfer`], [`TransferRequest`], [`TransferCheck`]
//! - **Payment model**: [`Payment`], [`PaymentLeg`]
//! - **Reconciliation reports**: [`SettlementReport`], [`ValidationReason`], [`ReasonCode`]
//! - **Collaborator seams**: [`Repository`], [`IdempotencyStore`], [`BeneficiaryDirectory`]
//! - **Configuration**: [`DealflowConfig`], [`LedgerConfig`], [`DealConfig`], [`TransferConfig`]
//! - **Errors**: [`DealflowError`] with `DF_ERR_` prefix codes
//! - **Constants**: system-wide limits and defaults

pub mod config;
pub mod constants;
pub mod deal;
pub mod directory;
pub mod error;
#[cfg(any(test, feature = "test-helpers"))]
pub mod fixtures;
pub mod idempotency;
pub mod ids;
pub mod ledger;
pub mod money;
pub mod payment;
pub mod repository;
pub mod transfer;
pub mod validation;

// Re-export all primary types at crate root for ergonomic imports:
//   use dealflow_types::{Deal, Step, Transfer, Hold, ...};

pub use config::*;
pub use deal::*;
pub use directory::*;
pub use error::*;
pub use idempotency::*;
pub use ids::*;
pub use ledger::*;
pub use money::*;
pub use payment::*;
pub use repository::*;
pub use transfer::*;
pub use validation::*;

// Constants are accessed via `dealflow_types::constants::FOO`
// (not re-exported to avoid name collisions).
