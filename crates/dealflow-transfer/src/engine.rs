//! Transfer creation and execution.
//!
//! Execution runs in three phases against the [`FundsLedger`]:
//!
//! 1. **Check**: sender balance exists, shares the transfer currency and has
//!    enough available funds; an existing recipient balance shares the
//!    currency.
//! 2. **Debit**: withdraw from the sender. Skipped when an earlier attempt
//!    already debited (`debited_at` is set).
//! 3. **Credit**: add funds to the recipient.
//!
//! Any error in these phases marks the Transfer FAILED with the error text
//! and is returned to the caller. Nothing is retried implicitly.

use std::sync::Arc;

use chrono::Utc;
use dealflow_ledger::Ledger;
use dealflow_types::{
    AccountRef, Balance, Currency, DealflowError, IdempotencyGuard, IdempotencyRecord,
    IdempotencyStore, InMemoryRepository, Repository, Result, Transfer, TransferCheck,
    TransferCheckReason, TransferConfig, TransferId, TransferIssue, TransferRequest,
    TransferStatus, ensure_positive, ensure_same_currency, fingerprint, validate_key,
};
use rust_decimal::Decimal;

use crate::funds::FundsLedger;

/// Owner of every Transfer.
pub struct TransferEngine<L: FundsLedger = Ledger> {
    ledger: Arc<L>,
    transfers: Box<dyn Repository<Transfer>>,
    idempotency: Box<dyn IdempotencyStore>,
}

impl<L: FundsLedger> TransferEngine<L> {
    pub fn new(
        ledger: Arc<L>,
        transfers: Box<dyn Repository<Transfer>>,
        idempotency: Box<dyn IdempotencyStore>,
    ) -> Self {
        Self {
            ledger,
            transfers,
            idempotency,
        }
    }

    /// In-memory transfer store and idempotency cache.
    pub fn in_memory(ledger: Arc<L>, config: &TransferConfig) -> Self {
        Self::new(
            ledger,
            Box::new(InMemoryRepository::<Transfer>::new()),
            Box::new(IdempotencyGuard::new(config.idempotency_cache_size.max(1))),
        )
    }

    #[must_use]
    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    /// Create a PENDING Transfer.
    ///
    /// # Errors
    /// - `Validation` if `from == to`, the amount is not positive, or the
    ///   currency is malformed
    /// - `DuplicateRequest` if the key was used for a different request
    pub fn create_transfer(
        &mut self,
        request: TransferRequest,
        idempotency_key: &str,
    ) -> Result<Transfer> {
        validate_key(idempotency_key)?;
        let fp = fingerprint(&(
            &request.from,
            &request.to,
            request.amount.normalize(),
            request.currency.trim().to_ascii_uppercase(),
            request.description.as_deref(),
        ))?;
        if let Some(existing) = self.idempotency.check(idempotency_key, &fp)? {
            tracing::debug!(key = idempotency_key, "Transfer creation replayed");
            return self.transfers.require(&TransferId::from_uuid(existing));
        }

        if request.from == request.to {
            return Err(DealflowError::validation(format!(
                "transfer source and destination are both {}",
                request.from
            )));
        }
        ensure_positive(request.amount, "transfer amount")?;
        let currency = Currency::parse(&request.currency)?;

        let now = Utc::now();
        let transfer = Transfer {
            id: TransferId::new(),
            from: request.from,
            to: request.to,
            amount: request.amount,
            currency,
            description: request.description,
            status: TransferStatus::Pending,
            failure_reason: None,
            attempts: 0,
            debited_at: None,
            created_at: now,
            updated_at: now,
            executed_at: None,
            failed_at: None,
            cancelled_at: None,
        };
        self.transfers.create(transfer.clone())?;
        self.idempotency.remember(
            idempotency_key,
            IdempotencyRecord {
                fingerprint: fp,
                resource_id: transfer.id.as_uuid(),
            },
        );
        tracing::info!(
            transfer = %transfer.id,
            from = %transfer.from,
            to = %transfer.to,
            amount = %transfer.amount,
            currency = %transfer.currency,
            "Transfer created"
        );
        Ok(transfer)
    }

    pub fn get_transfer(&self, transfer_id: TransferId) -> Result<Transfer> {
        self.transfers.require(&transfer_id)
    }

    /// Transfers touching `account` on either side, oldest first.
    pub fn list_transfers(&self, account: &AccountRef) -> Vec<Transfer> {
        self.transfers
            .list()
            .into_iter()
            .filter(|t| &t.from == account || &t.to == account)
            .collect()
    }

    /// Run a PENDING Transfer to completion.
    ///
    /// # Errors
    /// `InvalidStateTransition` unless PENDING (the Transfer is unchanged).
    /// Otherwise any check, debit or credit error, after the Transfer has
    /// been marked FAILED.
    pub fn execute_transfer(&mut self, transfer_id: TransferId) -> Result<Transfer> {
        let mut transfer = self.get_transfer(transfer_id)?;
        if transfer.status != TransferStatus::Pending {
            return Err(DealflowError::invalid_transition(
                transfer.id.to_string(),
                "execute",
                transfer.status,
                "PENDING",
            ));
        }
        transfer.attempts += 1;

        let outcome = self.apply(&mut transfer);
        let now = Utc::now();
        transfer.updated_at = now;
        match outcome {
            Ok(()) => {
                transfer.status = TransferStatus::Completed;
                transfer.executed_at = Some(now);
                self.transfers.update(transfer.clone())?;
                tracing::info!(
                    transfer = %transfer_id,
                    amount = %transfer.amount,
                    attempts = transfer.attempts,
                    "Transfer executed"
                );
                Ok(transfer)
            }
            Err(err) => {
                transfer.status = TransferStatus::Failed;
                transfer.failure_reason = Some(err.to_string());
                transfer.failed_at = Some(now);
                self.transfers.update(transfer.clone())?;
                tracing::warn!(
                    transfer = %transfer_id,
                    debited = transfer.debited_at.is_some(),
                    error = %err,
                    "Transfer failed"
                );
                Err(err)
            }
        }
    }

    /// FAILED → PENDING. Failure metadata is cleared; a recorded debit is
    /// kept so the next execution only credits.
    pub fn retry_transfer(&mut self, transfer_id: TransferId) -> Result<Transfer> {
        let mut transfer = self.get_transfer(transfer_id)?;
        if transfer.status != TransferStatus::Failed {
            return Err(DealflowError::invalid_transition(
                transfer.id.to_string(),
                "retry",
                transfer.status,
                "FAILED",
            ));
        }
        transfer.status = TransferStatus::Pending;
        transfer.failure_reason = None;
        transfer.failed_at = None;
        transfer.updated_at = Utc::now();
        self.transfers.update(transfer.clone())?;
        tracing::info!(
            transfer = %transfer_id,
            awaits_credit = transfer.awaits_credit(),
            "Transfer queued for retry"
        );
        Ok(transfer)
    }

    /// PENDING or FAILED → CANCELLED, unless the sender was already debited.
    pub fn cancel_transfer(&mut self, transfer_id: TransferId) -> Result<Transfer> {
        let mut transfer = self.get_transfer(transfer_id)?;
        if !transfer.status.can_transition_to(TransferStatus::Cancelled) {
            return Err(DealflowError::invalid_transition(
                transfer.id.to_string(),
                "cancel",
                transfer.status,
                "PENDING or FAILED",
            ));
        }
        if transfer.debited_at.is_some() {
            return Err(DealflowError::invalid_transition(
                transfer.id.to_string(),
                "cancel",
                format!("{} after debit", transfer.status),
                "no debit applied",
            ));
        }
        let now = Utc::now();
        transfer.status = TransferStatus::Cancelled;
        transfer.cancelled_at = Some(now);
        transfer.updated_at = now;
        self.transfers.update(transfer.clone())?;
        tracing::info!(transfer = %transfer_id, "Transfer cancelled");
        Ok(transfer)
    }

    /// Read-only report of everything that would stop a transfer right now.
    ///
    /// # Errors
    /// Only ledger failures other than a missing balance.
    pub fn check_transfer_possibility(
        &self,
        from: &AccountRef,
        to: &AccountRef,
        amount: Decimal,
        currency: &str,
    ) -> Result<TransferCheck> {
        let mut reasons = Vec::new();
        let mut reject = |code: TransferIssue, description: String| {
            reasons.push(TransferCheckReason { code, description });
        };

        if from == to {
            reject(
                TransferIssue::SameAccount,
                format!("source and destination are both {from}"),
            );
        }
        if amount <= Decimal::ZERO {
            reject(
                TransferIssue::NonPositiveAmount,
                format!("amount must be greater than zero, got {amount}"),
            );
        }
        let currency = match Currency::parse(currency) {
            Ok(c) => Some(c),
            Err(err) => {
                reject(TransferIssue::InvalidCurrency, err.to_string());
                None
            }
        };

        match self.find_balance(from)? {
            None => reject(
                TransferIssue::SenderBalanceNotFound,
                format!("no balance for {from}"),
            ),
            Some(sender) => {
                if currency.as_ref().is_some_and(|c| *c != sender.currency) {
                    reject(
                        TransferIssue::SenderCurrencyMismatch,
                        format!("sender balance is denominated in {}", sender.currency),
                    );
                } else if amount > Decimal::ZERO && sender.available() < amount {
                    reject(
                        TransferIssue::InsufficientFunds,
                        format!("need {amount}, available {}", sender.available()),
                    );
                }
            }
        }
        if let (Some(recipient), Some(c)) = (self.find_balance(to)?, currency.as_ref()) {
            if recipient.currency != *c {
                reject(
                    TransferIssue::RecipientCurrencyMismatch,
                    format!("recipient balance is denominated in {}", recipient.currency),
                );
            }
        }

        Ok(TransferCheck::from_reasons(reasons))
    }

    // -----------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------

    /// Check, debit, credit. Records the debit on `transfer` as soon as it
    /// happens.
    fn apply(&self, transfer: &mut Transfer) -> Result<()> {
        if transfer.debited_at.is_none() {
            let sender = self
                .find_balance(&transfer.from)?
                .ok_or(DealflowError::InsufficientFunds {
                    needed: transfer.amount,
                    available: Decimal::ZERO,
                })?;
            ensure_same_currency(&sender.currency, &transfer.currency, "sender balance")?;
            if sender.available() < transfer.amount {
                return Err(DealflowError::InsufficientFunds {
                    needed: transfer.amount,
                    available: sender.available(),
                });
            }
        }
        if let Some(recipient) = self.find_balance(&transfer.to)? {
            ensure_same_currency(&recipient.currency, &transfer.currency, "recipient balance")?;
        }

        if transfer.debited_at.is_none() {
            self.ledger
                .withdraw_funds(&transfer.from, transfer.amount, &transfer.currency)?;
            transfer.debited_at = Some(Utc::now());
        }
        self.ledger
            .add_funds(&transfer.to, transfer.amount, &transfer.currency)?;
        Ok(())
    }

    /// `None` for an account that has never been opened.
    fn find_balance(&self, account: &AccountRef) -> Result<Option<Balance>> {
        match self.ledger.balance(account) {
            Ok(balance) => Ok(Some(balance)),
            Err(DealflowError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }
}
