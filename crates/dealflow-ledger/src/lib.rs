//! # dealflow-ledger
//!
//! **Ledger**: owns every [`Balance`] and [`Hold`] and is the only code that
//! mutates them.
//!
//! ## Architecture
//!
//! 1. **AccountBook**: one account's balance plus its holds. Every
//!    check-then-mutate sequence (withdraw, reserve, execute) runs inside a
//!    single `&mut AccountBook` call.
//! 2. **Ledger**: maps [`AccountRef`]s to books, each behind its own
//!    `Mutex`, so concurrent requests against one account serialize while
//!    different accounts proceed in parallel.
//!
//! ## Availability rule
//!
//! ```text
//! available = amount - Σ(ACTIVE holds)
//! ```
//!
//! Withdrawals and new holds are both checked against `available`, so
//! `amount >= holds >= 0` holds after every operation.
//!
//! [`Balance`]: dealflow_types::Balance
//! [`Hold`]: dealflow_types::Hold
//! [`AccountRef`]: dealflow_types::AccountRef

pub mod account_book;
pub mod ledger;

pub use account_book::AccountBook;
pub use ledger::Ledger;
