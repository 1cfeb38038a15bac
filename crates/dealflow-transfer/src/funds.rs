//! The slice of the ledger the transfer engine moves money through.

use dealflow_ledger::Ledger;
use dealflow_types::{AccountRef, Balance, Currency, Result};
use rust_decimal::Decimal;

/// Balance reads plus the two money-moving primitives.
///
/// [`Ledger`] is the production implementation. Tests wrap it to inject
/// failures between the debit and the credit of a transfer.
pub trait FundsLedger: Send + Sync {
    fn balance(&self, account: &AccountRef) -> Result<Balance>;

    fn withdraw_funds(
        &self,
        account: &AccountRef,
        amount: Decimal,
        currency: &Currency,
    ) -> Result<Balance>;

    fn add_funds(
        &self,
        account: &AccountRef,
        amount: Decimal,
        currency: &Currency,
    ) -> Result<Balance>;
}

impl FundsLedger for Ledger {
    fn balance(&self, account: &AccountRef) -> Result<Balance> {
        Ledger::balance(self, account)
    }

    fn withdraw_funds(
        &self,
        account: &AccountRef,
        amount: Decimal,
        currency: &Currency,
    ) -> Result<Balance> {
        Ledger::withdraw_funds(self, account, amount, currency)
    }

    fn add_funds(
        &self,
        account: &AccountRef,
        amount: Decimal,
        currency: &Currency,
    ) -> Result<Balance> {
        Ledger::add_funds(self, account, amount, currency)
    }
}
