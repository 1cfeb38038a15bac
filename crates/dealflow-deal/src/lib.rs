//! # dealflow-deal
//!
//! **Deal lifecycle**: the Deal → Step → Deponent/Recipient aggregate, its
//! two state machines, and the reconciliation that gates payment.
//!
//! ## Architecture
//!
//! 1. **DealLifecycle**: owns one [`Repository`] per record type and is the
//!    only writer of Deals, Steps and their members. Member edits are only
//!    accepted while the owning Deal is DRAFT; bank details may also be
//!    corrected while it is PAYMENT_FAILED.
//! 2. **SettlementValidator**: read-only check that every Step's deposits
//!    cover its disbursements. Gates `confirm_deal`, `accept_deal` and
//!    `complete_step`.
//!
//! [`Repository`]: dealflow_types::Repository

pub mod lifecycle;
mod members;
pub mod validator;

pub use lifecycle::{DealLifecycle, DealStores};
pub use validator::{DealReader, SettlementValidator};
