//! One account's balance and holds.
//!
//! Tracks the total `amount` and the ACTIVE-hold sum for a single
//! [`AccountRef`]. All mutations are atomic: either the full operation
//! succeeds or the book is unchanged.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use dealflow_types::{
    AccountRef, Balance, BalanceInfo, Currency, DealflowError, Hold, HoldId, HoldStatus, Result,
    ensure_positive, ensure_same_currency,
};
use rust_decimal::Decimal;

/// Balance plus holds for one account.
///
/// The [`Ledger`](crate::Ledger) keeps each book behind its own mutex; the
/// book itself is plain data and assumes exclusive access.
#[derive(Debug, Clone)]
pub struct AccountBook {
    balance: Balance,
    /// Every hold ever placed on this account, by id.
    holds: HashMap<HoldId, Hold>,
}

impl AccountBook {
    /// Create an empty book denominated in `currency`.
    #[must_use]
    pub fn new(account: AccountRef, currency: Currency) -> Self {
        Self {
            balance: Balance::new(account, currency),
            holds: HashMap::new(),
        }
    }

    #[must_use]
    pub fn balance(&self) -> &Balance {
        &self.balance
    }

    #[must_use]
    pub fn currency(&self) -> &Currency {
        &self.balance.currency
    }

    /// Credit the account.
    ///
    /// # Errors
    /// `Validation` if `amount <= 0` or the currency differs.
    pub fn deposit(&mut self, amount: Decimal, currency: &Currency) -> Result<()> {
        ensure_positive(amount, "deposit amount")?;
        ensure_same_currency(&self.balance.currency, currency, "balance")?;
        self.balance.amount += amount;
        self.touch();
        Ok(())
    }

    /// Debit the account.
    ///
    /// # Errors
    /// - `Validation` if `amount <= 0` or the currency differs
    /// - `InsufficientFunds` if `amount` exceeds the available balance
    pub fn withdraw(&mut self, amount: Decimal, currency: &Currency) -> Result<()> {
        ensure_positive(amount, "withdrawal amount")?;
        ensure_same_currency(&self.balance.currency, currency, "balance")?;
        self.ensure_available(amount)?;
        self.balance.amount -= amount;
        self.touch();
        Ok(())
    }

    /// Reserve `amount` against the available balance.
    ///
    /// # Errors
    /// - `Validation` if `amount <= 0`
    /// - `InsufficientFunds` if `amount` exceeds the available balance
    pub fn reserve(
        &mut self,
        amount: Decimal,
        reason: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Hold> {
        ensure_positive(amount, "hold amount")?;
        self.ensure_available(amount)?;

        let hold = Hold {
            id: HoldId::new(),
            account: self.balance.account.clone(),
            amount,
            currency: self.balance.currency.clone(),
            reason: reason.to_string(),
            status: HoldStatus::Active,
            expires_at,
            created_at: Utc::now(),
            resolved_at: None,
        };
        self.balance.holds += amount;
        self.holds.insert(hold.id, hold.clone());
        self.touch();
        Ok(hold)
    }

    /// ACTIVE → RELEASED. Frees the reservation; `amount` is unchanged.
    ///
    /// # Errors
    /// `NotFound` for an unknown hold, `InvalidStateTransition` if it is not ACTIVE.
    pub fn release(&mut self, hold_id: HoldId) -> Result<Hold> {
        let hold = self
            .holds
            .get_mut(&hold_id)
            .ok_or_else(|| DealflowError::not_found("hold", hold_id))?;
        hold.transition(HoldStatus::Released, "release")?;
        let released = hold.clone();
        self.balance.holds -= released.amount;
        self.touch();
        Ok(released)
    }

    /// ACTIVE → EXECUTED. Withdraws the reserved amount from the balance.
    ///
    /// If the withdrawal cannot be made the hold stays ACTIVE.
    ///
    /// # Errors
    /// - `NotFound` for an unknown hold
    /// - `InvalidStateTransition` if it is not ACTIVE
    /// - `InsufficientFunds` if the balance no longer covers the hold
    pub fn execute(&mut self, hold_id: HoldId) -> Result<Hold> {
        let hold = self
            .holds
            .get(&hold_id)
            .ok_or_else(|| DealflowError::not_found("hold", hold_id))?;
        if !hold.status.can_transition_to(HoldStatus::Executed) {
            return Err(DealflowError::invalid_transition(
                hold_id.to_string(),
                "execute",
                hold.status,
                "ACTIVE",
            ));
        }
        let amount = hold.amount;
        // The hold's own reservation is spendable by the hold.
        let spendable = self.balance.available() + amount;
        if amount > spendable || amount > self.balance.amount {
            return Err(DealflowError::InsufficientFunds {
                needed: amount,
                available: spendable.min(self.balance.amount),
            });
        }

        let hold = self
            .holds
            .get_mut(&hold_id)
            .ok_or_else(|| DealflowError::not_found("hold", hold_id))?;
        hold.transition(HoldStatus::Executed, "execute")?;
        let executed = hold.clone();
        self.balance.holds -= amount;
        self.balance.amount -= amount;
        self.touch();
        Ok(executed)
    }

    /// Release every ACTIVE hold whose expiry is at or before `now`.
    pub fn release_expired(&mut self, now: DateTime<Utc>) -> Vec<Hold> {
        let expired: Vec<HoldId> = self
            .holds
            .values()
            .filter(|h| h.is_expired_at(now))
            .map(|h| h.id)
            .collect();
        expired
            .into_iter()
            .filter_map(|id| self.release(id).ok())
            .collect()
    }

    #[must_use]
    pub fn hold(&self, hold_id: &HoldId) -> Option<&Hold> {
        self.holds.get(hold_id)
    }

    /// All holds, oldest first.
    #[must_use]
    pub fn holds(&self) -> Vec<Hold> {
        let mut all: Vec<Hold> = self.holds.values().cloned().collect();
        all.sort_by_key(|h| h.id);
        all
    }

    /// Balance plus aggregate hold figures.
    #[must_use]
    pub fn info(&self) -> BalanceInfo {
        let active_holds: Vec<Hold> = self.holds().into_iter().filter(Hold::is_active).collect();
        let held_amount: Decimal = active_holds.iter().map(|h| h.amount).sum();
        BalanceInfo {
            balance: self.balance.clone(),
            available_amount: self.balance.amount - held_amount,
            held_amount,
            total_holds: self.holds.len(),
            active_holds,
        }
    }

    /// `amount >= holds >= 0` and `holds` equals the ACTIVE-hold sum.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let active: Decimal = self
            .holds
            .values()
            .filter(|h| h.is_active())
            .map(|h| h.amount)
            .sum();
        self.balance.is_consistent() && active == self.balance.holds
    }

    fn ensure_available(&self, amount: Decimal) -> Result<()> {
        let available = self.balance.available();
        if amount > available {
            return Err(DealflowError::InsufficientFunds {
                needed: amount,
                available,
            });
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.balance.updated_at = Utc::now();
        debug_assert!(self.is_consistent(), "account book invariant broken");
    }
}
