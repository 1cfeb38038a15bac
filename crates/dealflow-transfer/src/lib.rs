//! # dealflow-transfer
//!
//! **Money movement**: point-to-point transfers over the ledger, and the
//! payment of a Step as a sequence of such transfers.
//!
//! ## Architecture
//!
//! 1. **TransferEngine**: creates Transfers idempotently and executes them
//!    as check → debit → credit. A failure at any point leaves the Transfer
//!    FAILED; a debit that already happened is recorded on the Transfer, so
//!    a retry only credits.
//! 2. **PaymentCoordinator**: pays out one Step. Deponents' funds move into
//!    the Step's escrow account, then out to each Recipient's payout account.
//!    A failed leg puts the Deal into PAYMENT_FAILED until the caller fixes
//!    the cause and retries.
//!
//! ## Execution Flow
//!
//! ```text
//! disburse_step ──▶ validate step ──▶ deposit legs ──▶ disbursement legs ──▶ step COMPLETED
//!                                          │                   │
//!                                          └──── failure ──────┴──▶ deal PAYMENT_FAILED
//! ```

pub mod engine;
pub mod funds;
pub mod payment;

pub use engine::TransferEngine;
pub use funds::FundsLedger;
pub use payment::PaymentCoordinator;
