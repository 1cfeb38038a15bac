//! Multi-account ledger with per-account serialization.
//!
//! Each [`AccountBook`] sits behind its own `Mutex`; the account map and the
//! hold → account index sit behind `RwLock`s that are only held long enough
//! to find or insert a book. A book lock is never held while waiting on the
//! map or index locks in the opposite order.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, RwLock},
};

use chrono::{DateTime, Utc};
use dealflow_types::{
    AccountRef, Balance, BalanceInfo, Currency, DealflowError, Hold, HoldId, LedgerConfig, Result,
    ensure_positive, ensure_same_currency,
};
use rust_decimal::Decimal;

use crate::account_book::AccountBook;

type SharedBook = Arc<Mutex<AccountBook>>;

/// Owner of every Balance and Hold.
///
/// All methods take `&self`; share the ledger across threads with `Arc`.
pub struct Ledger {
    config: LedgerConfig,
    books: RwLock<HashMap<AccountRef, SharedBook>>,
    hold_index: RwLock<HashMap<HoldId, AccountRef>>,
}

impl Ledger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            config,
            books: RwLock::new(HashMap::new()),
            hold_index: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Create a zero balance, or return the existing one.
    ///
    /// This is the only operation that accepts a zero amount.
    ///
    /// # Errors
    /// `Validation` if the account already exists in another currency.
    pub fn open_account(&self, account: &AccountRef, currency: &Currency) -> Result<Balance> {
        let book = self.book_or_open(account, currency)?;
        let guard = lock(&book)?;
        ensure_same_currency(guard.currency(), currency, "balance")?;
        Ok(guard.balance().clone())
    }

    /// Credit `account`, creating its balance if absent.
    ///
    /// # Errors
    /// `Validation` if `amount <= 0` or the balance uses another currency.
    pub fn add_funds(
        &self,
        account: &AccountRef,
        amount: Decimal,
        currency: &Currency,
    ) -> Result<Balance> {
        ensure_positive(amount, "deposit amount")?;
        let book = self.book_or_open(account, currency)?;
        let mut guard = lock(&book)?;
        guard.deposit(amount, currency)?;
        tracing::info!(
            account = %account,
            amount = %amount,
            currency = %currency,
            total = %guard.balance().amount,
            "Funds added"
        );
        Ok(guard.balance().clone())
    }

    /// Debit `account`.
    ///
    /// # Errors
    /// - `Validation` for a non-positive amount or currency mismatch
    /// - `InsufficientFunds` if `amount` exceeds the available balance
    ///   (an absent balance has zero available)
    pub fn withdraw_funds(
        &self,
        account: &AccountRef,
        amount: Decimal,
        currency: &Currency,
    ) -> Result<Balance> {
        ensure_positive(amount, "withdrawal amount")?;
        let book = self.book(account)?.ok_or(DealflowError::InsufficientFunds {
            needed: amount,
            available: Decimal::ZERO,
        })?;
        let mut guard = lock(&book)?;
        if let Err(err) = guard.withdraw(amount, currency) {
            tracing::warn!(
                account = %account,
                amount = %amount,
                error = %err,
                "Withdrawal rejected"
            );
            return Err(err);
        }
        tracing::info!(
            account = %account,
            amount = %amount,
            total = %guard.balance().amount,
            "Funds withdrawn"
        );
        Ok(guard.balance().clone())
    }

    /// Reserve `amount` on `account`.
    ///
    /// Without an explicit `expires_at`, the configured default TTL applies.
    ///
    /// # Errors
    /// - `Validation` for a non-positive amount
    /// - `InsufficientFunds` if `amount` exceeds the available balance
    pub fn create_hold(
        &self,
        account: &AccountRef,
        amount: Decimal,
        reason: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Hold> {
        ensure_positive(amount, "hold amount")?;
        let expires_at = expires_at.or_else(|| {
            self.config
                .default_hold_ttl_secs
                .and_then(|secs| i64::try_from(secs).ok())
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs))
        });
        let book = self.book(account)?.ok_or(DealflowError::InsufficientFunds {
            needed: amount,
            available: Decimal::ZERO,
        })?;

        let hold = {
            let mut guard = lock(&book)?;
            match guard.reserve(amount, reason, expires_at) {
                Ok(hold) => hold,
                Err(err) => {
                    tracing::warn!(
                        account = %account,
                        amount = %amount,
                        error = %err,
                        "Hold rejected"
                    );
                    return Err(err);
                }
            }
        };

        self.hold_index
            .write()
            .map_err(|_| poisoned("hold index"))?
            .insert(hold.id, account.clone());
        tracing::info!(hold = %hold.id, account = %account, amount = %amount, "Hold created");
        Ok(hold)
    }

    /// ACTIVE → RELEASED. No balance change beyond freeing the reservation.
    ///
    /// # Errors
    /// `NotFound` or `InvalidStateTransition`.
    pub fn release_hold(&self, hold_id: HoldId) -> Result<Hold> {
        let book = self.book_for_hold(hold_id)?;
        let hold = lock(&book)?.release(hold_id)?;
        tracing::info!(hold = %hold_id, amount = %hold.amount, "Hold released");
        Ok(hold)
    }

    /// ACTIVE → EXECUTED. Withdraws the held amount under the account lock.
    ///
    /// # Errors
    /// `NotFound`, `InvalidStateTransition`, or `InsufficientFunds`; on any
    /// error the hold stays in its prior status.
    pub fn execute_hold(&self, hold_id: HoldId) -> Result<Hold> {
        let book = self.book_for_hold(hold_id)?;
        let mut guard = lock(&book)?;
        let hold = guard.execute(hold_id)?;
        tracing::info!(
            hold = %hold_id,
            amount = %hold.amount,
            total = %guard.balance().amount,
            "Hold executed"
        );
        Ok(hold)
    }

    /// Release every ACTIVE hold whose expiry is at or before `now`.
    pub fn release_expired_holds(&self, now: DateTime<Utc>) -> Result<Vec<Hold>> {
        let books: Vec<SharedBook> = self
            .books
            .read()
            .map_err(|_| poisoned("account map"))?
            .values()
            .cloned()
            .collect();

        let mut released = Vec::new();
        for book in books {
            released.extend(lock(&book)?.release_expired(now));
        }
        if !released.is_empty() {
            tracing::info!(count = released.len(), "Expired holds released");
        }
        Ok(released)
    }

    /// Current balance of `account`.
    ///
    /// # Errors
    /// `NotFound` if the account has never been opened.
    pub fn balance(&self, account: &AccountRef) -> Result<Balance> {
        let book = self.require_book(account)?;
        let guard = lock(&book)?;
        Ok(guard.balance().clone())
    }

    /// Balance plus hold aggregates for `account`.
    ///
    /// # Errors
    /// `NotFound` if the account has never been opened.
    pub fn balance_info(&self, account: &AccountRef) -> Result<BalanceInfo> {
        let book = self.require_book(account)?;
        let guard = lock(&book)?;
        Ok(guard.info())
    }

    /// Look up a hold by id.
    ///
    /// # Errors
    /// `NotFound` for an unknown id.
    pub fn hold(&self, hold_id: HoldId) -> Result<Hold> {
        let book = self.book_for_hold(hold_id)?;
        let guard = lock(&book)?;
        guard
            .hold(&hold_id)
            .cloned()
            .ok_or_else(|| DealflowError::not_found("hold", hold_id))
    }

    /// All holds on `account`, oldest first.
    ///
    /// # Errors
    /// `NotFound` if the account has never been opened.
    pub fn holds(&self, account: &AccountRef) -> Result<Vec<Hold>> {
        let book = self.require_book(account)?;
        let guard = lock(&book)?;
        Ok(guard.holds())
    }

    /// Sum of `amount` over every account in `currency`.
    pub fn total_amount(&self, currency: &Currency) -> Result<Decimal> {
        let books: Vec<SharedBook> = self
            .books
            .read()
            .map_err(|_| poisoned("account map"))?
            .values()
            .cloned()
            .collect();
        let mut total = Decimal::ZERO;
        for book in books {
            let guard = lock(&book)?;
            if guard.currency() == currency {
                total += guard.balance().amount;
            }
        }
        Ok(total)
    }

    // -----------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------

    fn book(&self, account: &AccountRef) -> Result<Option<SharedBook>> {
        Ok(self
            .books
            .read()
            .map_err(|_| poisoned("account map"))?
            .get(account)
            .cloned())
    }

    fn require_book(&self, account: &AccountRef) -> Result<SharedBook> {
        self.book(account)?
            .ok_or_else(|| DealflowError::not_found("balance", account))
    }

    fn book_or_open(&self, account: &AccountRef, currency: &Currency) -> Result<SharedBook> {
        if let Some(book) = self.book(account)? {
            return Ok(book);
        }
        let mut books = self.books.write().map_err(|_| poisoned("account map"))?;
        let book = books.entry(account.clone()).or_insert_with(|| {
            tracing::info!(account = %account, currency = %currency, "Balance opened");
            Arc::new(Mutex::new(AccountBook::new(account.clone(), currency.clone())))
        });
        Ok(Arc::clone(book))
    }

    fn book_for_hold(&self, hold_id: HoldId) -> Result<SharedBook> {
        let account = self
            .hold_index
            .read()
            .map_err(|_| poisoned("hold index"))?
            .get(&hold_id)
            .cloned()
            .ok_or_else(|| DealflowError::not_found("hold", hold_id))?;
        self.book(&account)?.ok_or_else(|| {
            DealflowError::Internal(format!("hold {hold_id} indexed to missing account"))
        })
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new(LedgerConfig::default())
    }
}

fn lock(book: &Mutex<AccountBook>) -> Result<MutexGuard<'_, AccountBook>> {
    book.lock().map_err(|_| poisoned("account book"))
}

fn poisoned(what: &str) -> DealflowError {
    DealflowError::Internal(format!("{what} lock poisoned"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dealflow_types::fixtures::{dec, rub};
    use dealflow_types::{BeneficiaryId, HoldStatus};

    fn funded(ledger: &Ledger, amount: i64) -> AccountRef {
        let account = AccountRef::beneficiary(BeneficiaryId::new());
        ledger.add_funds(&account, dec(amount), &rub()).unwrap();
        account
    }

    #[test]
    fn add_funds_creates_then_increments() {
        let ledger = Ledger::default();
        let account = funded(&ledger, 100);
        let bal = ledger.add_funds(&account, dec(50), &rub()).unwrap();
        assert_eq!(bal.amount, dec(150));
    }

    #[test]
    fn add_funds_rejects_non_positive_without_opening() {
        let ledger = Ledger::default();
        let account = AccountRef::beneficiary(BeneficiaryId::new());
        let err = ledger.add_funds(&account, Decimal::ZERO, &rub()).unwrap_err();
        assert!(matches!(err, DealflowError::Validation { .. }));
        assert!(matches!(
            ledger.balance(&account).unwrap_err(),
            DealflowError::NotFound { kind: "balance", .. }
        ));
    }

    #[test]
    fn add_funds_rejects_currency_mismatch() {
        let ledger = Ledger::default();
        let account = funded(&ledger, 100);
        let usd = Currency::parse("USD").unwrap();
        let err = ledger.add_funds(&account, dec(1), &usd).unwrap_err();
        assert!(matches!(err, DealflowError::Validation { .. }));
    }

    #[test]
    fn open_account_is_zero_and_idempotent() {
        let ledger = Ledger::default();
        let account = AccountRef::beneficiary(BeneficiaryId::new());
        let bal = ledger.open_account(&account, &rub()).unwrap();
        assert_eq!(bal.amount, Decimal::ZERO);
        ledger.add_funds(&account, dec(5), &rub()).unwrap();
        let bal = ledger.open_account(&account, &rub()).unwrap();
        assert_eq!(bal.amount, dec(5));
        let usd = Currency::parse("USD").unwrap();
        assert!(ledger.open_account(&account, &usd).is_err());
    }

    #[test]
    fn withdraw_from_missing_account_is_insufficient() {
        let ledger = Ledger::default();
        let account = AccountRef::beneficiary(BeneficiaryId::new());
        let err = ledger.withdraw_funds(&account, dec(1), &rub()).unwrap_err();
        assert!(
            matches!(err, DealflowError::InsufficientFunds { available, .. } if available.is_zero())
        );
    }

    #[test]
    fn hold_over_balance_fails_and_leaves_balance() {
        // Balance 100, hold 150.
        let ledger = Ledger::default();
        let account = funded(&ledger, 100);
        let err = ledger.create_hold(&account, dec(150), "deal", None).unwrap_err();
        assert!(matches!(err, DealflowError::InsufficientFunds { .. }));
        let info = ledger.balance_info(&account).unwrap();
        assert_eq!(info.balance.amount, dec(100));
        assert_eq!(info.total_holds, 0);
    }

    #[test]
    fn execute_hold_debits_and_blocks_release() {
        // Hold 60 on 100, execute, then release must fail.
        let ledger = Ledger::default();
        let account = funded(&ledger, 100);
        let hold = ledger.create_hold(&account, dec(60), "deal", None).unwrap();
        let executed = ledger.execute_hold(hold.id).unwrap();
        assert_eq!(executed.status, HoldStatus::Executed);
        assert_eq!(ledger.balance(&account).unwrap().amount, dec(40));

        let err = ledger.release_hold(hold.id).unwrap_err();
        assert!(matches!(err, DealflowError::InvalidStateTransition { .. }));
        assert_eq!(ledger.hold(hold.id).unwrap().status, HoldStatus::Executed);
    }

    #[test]
    fn balance_info_matches_holds() {
        let ledger = Ledger::default();
        let account = funded(&ledger, 100);
        let h = ledger.create_hold(&account, dec(30), "a", None).unwrap();
        ledger.create_hold(&account, dec(25), "b", None).unwrap();
        ledger.release_hold(h.id).unwrap();

        let info = ledger.balance_info(&account).unwrap();
        assert_eq!(info.held_amount, dec(25));
        assert_eq!(info.available_amount, dec(75));
        assert_eq!(info.total_holds, 2);
        assert_eq!(info.active_holds.len(), 1);
        assert_eq!(ledger.holds(&account).unwrap().len(), 2);
    }

    #[test]
    fn default_ttl_applies_and_sweep_releases() {
        let ledger = Ledger::new(LedgerConfig {
            default_hold_ttl_secs: Some(60),
            ..LedgerConfig::default()
        });
        let account = funded(&ledger, 100);
        let hold = ledger.create_hold(&account, dec(10), "ttl", None).unwrap();
        assert!(hold.expires_at.is_some());

        assert!(ledger.release_expired_holds(Utc::now()).unwrap().is_empty());
        let later = Utc::now() + chrono::Duration::seconds(120);
        let released = ledger.release_expired_holds(later).unwrap();
        assert_eq!(released.len(), 1);
        assert_eq!(ledger.hold(hold.id).unwrap().status, HoldStatus::Released);
        assert_eq!(ledger.balance(&account).unwrap().holds, Decimal::ZERO);
    }

    #[test]
    fn unknown_hold_is_not_found() {
        let ledger = Ledger::default();
        let err = ledger.execute_hold(HoldId::new()).unwrap_err();
        assert!(matches!(err, DealflowError::NotFound { kind: "hold", .. }));
    }

    #[test]
    fn total_amount_sums_currency() {
        let ledger = Ledger::default();
        funded(&ledger, 100);
        funded(&ledger, 50);
        let usd = Currency::parse("USD").unwrap();
        let other = AccountRef::beneficiary(BeneficiaryId::new());
        ledger.add_funds(&other, dec(7), &usd).unwrap();
        assert_eq!(ledger.total_amount(&rub()).unwrap(), dec(150));
        assert_eq!(ledger.total_amount(&usd).unwrap(), dec(7));
    }
}
