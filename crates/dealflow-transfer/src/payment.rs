//! Step payment: deposits into escrow, then disbursements out of it.
//!
//! A [`Payment`] is a list of legs, each carried by one Transfer:
//!
//! ```text
//!   deponent/main ──deposit──▶ step/escrow ──disbursement──▶ recipient/<bank details>
//! ```
//!
//! Legs execute in order and stop at the first failure. A failed Payment
//! moves its Deal to PAYMENT_FAILED. After the cause is fixed (funds topped
//! up, recipient bank details replaced), [`PaymentCoordinator::retry_payment`]
//! resumes the Deal and finishes the remaining legs.

use chrono::Utc;
use dealflow_deal::DealLifecycle;
use dealflow_types::{
    AccountRef, BeneficiaryId, DealId, DealStatus, DealflowConfig, DealflowError, Deponent,
    IdempotencyGuard, IdempotencyRecord, IdempotencyStore, InMemoryRepository, LedgerConfig,
    LegKind, Party, Payment, PaymentId, PaymentLeg, PaymentRequest, PaymentStatus, Recipient,
    RecipientId, Repository, Result, Step, StepId, StepStatus, TransferId, TransferRequest,
    TransferStatus,
    fingerprint, validate_key,
};

use crate::engine::TransferEngine;
use crate::funds::FundsLedger;

/// Owner of every Payment.
pub struct PaymentCoordinator {
    accounts: LedgerConfig,
    payments: Box<dyn Repository<Payment>>,
    idempotency: Box<dyn IdempotencyStore>,
}

impl PaymentCoordinator {
    /// `accounts` supplies the account names used for deponents and escrow.
    pub fn new(
        accounts: LedgerConfig,
        payments: Box<dyn Repository<Payment>>,
        idempotency: Box<dyn IdempotencyStore>,
    ) -> Self {
        Self {
            accounts,
            payments,
            idempotency,
        }
    }

    pub fn in_memory(config: &DealflowConfig) -> Self {
        Self::new(
            config.ledger.clone(),
            Box::new(InMemoryRepository::<Payment>::new()),
            Box::new(IdempotencyGuard::new(
                config.transfers.idempotency_cache_size.max(1),
            )),
        )
    }

    pub fn get_payment(&self, payment_id: PaymentId) -> Result<Payment> {
        self.payments.require(&payment_id)
    }

    /// Account a deponent pays from.
    #[must_use]
    pub fn deponent_account(&self, beneficiary: BeneficiaryId) -> AccountRef {
        AccountRef::new(
            Party::Beneficiary(beneficiary),
            self.accounts.default_account.clone(),
        )
    }

    /// Escrow account of a Step.
    #[must_use]
    pub fn escrow_account(&self, step_id: StepId) -> AccountRef {
        AccountRef::new(Party::Step(step_id), self.accounts.escrow_account.clone())
    }

    /// Account a recipient is paid into: one per set of bank details.
    #[must_use]
    pub fn payout_account(recipient: &Recipient) -> AccountRef {
        AccountRef::new(
            Party::Beneficiary(recipient.beneficiary_id),
            recipient.bank_details_id.to_string(),
        )
    }

    /// Pay out one Step of an ACCEPTED Deal.
    ///
    /// A NEW Step is started first. On success the Step is COMPLETED. On a
    /// leg failure the Payment is FAILED, the Deal PAYMENT_FAILED, and the
    /// leg's error is returned.
    ///
    /// A Step gets at most one Payment. Once it exists, only
    /// [`retry_payment`](Self::retry_payment) moves that Step's money again.
    ///
    /// # Errors
    /// - `InvalidStateTransition` unless the Deal is ACCEPTED and the Step
    ///   NEW or ACTIVE without a Payment
    /// - `IncompleteSettlement` if the Step does not reconcile
    /// - `DuplicateRequest` if the key was used for another Step
    pub fn disburse_step<L: FundsLedger>(
        &mut self,
        deals: &mut DealLifecycle,
        engine: &mut TransferEngine<L>,
        deal_id: DealId,
        step_id: StepId,
        idempotency_key: &str,
    ) -> Result<Payment> {
        validate_key(idempotency_key)?;
        let fp = fingerprint(&PaymentRequest { deal_id, step_id })?;
        if let Some(existing) = self.idempotency.check(idempotency_key, &fp)? {
            tracing::debug!(key = idempotency_key, "Payment request replayed");
            return self.payments.require(&PaymentId::from_uuid(existing));
        }

        let deal = deals.get_deal(deal_id)?;
        if deal.status != DealStatus::Accepted {
            return Err(DealflowError::invalid_transition(
                deal.label(),
                "disburse",
                deal.status,
                "ACCEPTED",
            ));
        }
        let step = deals.get_step(deal_id, step_id)?;
        if !step.status.is_open() {
            return Err(DealflowError::invalid_transition(
                step.id.to_string(),
                "disburse",
                step.status,
                "NEW or ACTIVE",
            ));
        }
        if let Some(existing) = step.payment_id {
            tracing::warn!(
                step = %step_id,
                payment = %existing,
                "Step already has an unfinished payment"
            );
            return Err(DealflowError::invalid_transition(
                step.id.to_string(),
                "disburse",
                format!("{} with {existing}", step.status),
                "no payment started; retry the existing one",
            ));
        }
        let report = deals.validate_step(deal_id, step_id)?;
        if !report.is_valid {
            return Err(DealflowError::IncompleteSettlement {
                reasons: report.reasons,
            });
        }
        if step.status == StepStatus::New {
            deals.start_step(deal_id, step_id)?;
        }

        let payment_id = PaymentId::new();
        let deponents = deals.list_deponents(step_id)?;
        let recipients = deals.list_recipients(step_id)?;
        let mut legs = Vec::with_capacity(deponents.len() + recipients.len());
        for deponent in &deponents {
            legs.push(self.deposit_leg(engine, payment_id, &step, deponent)?);
        }
        for recipient in &recipients {
            legs.push(self.disbursement_leg(engine, payment_id, &step, recipient, 0)?);
        }
        deals.bind_payment(deal_id, step_id, payment_id)?;

        let now = Utc::now();
        let payment = Payment {
            id: payment_id,
            deal_id,
            step_id,
            status: PaymentStatus::Pending,
            legs,
            failure_reason: None,
            idempotency_key: idempotency_key.to_string(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.payments.create(payment.clone())?;
        self.idempotency.remember(
            idempotency_key,
            IdempotencyRecord {
                fingerprint: fp,
                resource_id: payment_id.as_uuid(),
            },
        );
        tracing::info!(
            payment = %payment_id,
            deal = %deal_id,
            step = %step_id,
            legs = payment.legs.len(),
            "Payment created"
        );

        self.run_legs(deals, engine, payment)
    }

    /// Resume a FAILED Payment.
    ///
    /// A Deal in PAYMENT_FAILED is resumed to ACCEPTED first; an ACCEPTED
    /// Deal is used as it is. Completed legs are skipped. A failed
    /// disbursement leg that never debited escrow and whose Recipient now
    /// has different bank details is cancelled and reissued to the new
    /// payout account; other failed legs are retried as they are.
    ///
    /// Every record is loaded before the Deal's status changes, so a failed
    /// lookup leaves the Deal untouched.
    pub fn retry_payment<L: FundsLedger>(
        &mut self,
        deals: &mut DealLifecycle,
        engine: &mut TransferEngine<L>,
        payment_id: PaymentId,
    ) -> Result<Payment> {
        let mut payment = self.get_payment(payment_id)?;
        if payment.status != PaymentStatus::Failed {
            return Err(DealflowError::invalid_transition(
                payment_id.to_string(),
                "retry",
                payment.status,
                "FAILED",
            ));
        }
        let deal = deals.get_deal(payment.deal_id)?;
        let resume = match deal.status {
            DealStatus::PaymentFailed => true,
            DealStatus::Accepted => false,
            other => {
                return Err(DealflowError::invalid_transition(
                    deal.label(),
                    "retry payment of",
                    other,
                    "PAYMENT_FAILED or ACCEPTED",
                ));
            }
        };
        let step = deals.get_step(payment.deal_id, payment.step_id)?;

        let mut reissues = Vec::new();
        for (index, leg) in payment.legs.iter().enumerate() {
            if leg.kind != LegKind::Disbursement {
                continue;
            }
            let transfer = engine.get_transfer(leg.transfer_id)?;
            if transfer.status != TransferStatus::Failed || transfer.debited_at.is_some() {
                continue;
            }
            let recipient = deals.get_recipient(RecipientId::from_uuid(leg.member_id))?;
            if Self::payout_account(&recipient) != transfer.to {
                reissues.push((index, transfer.id, recipient));
            }
        }

        if resume {
            deals.resume_after_payment_failure(payment.deal_id)?;
        }
        for (index, old, recipient) in reissues {
            engine.cancel_transfer(old)?;
            let revision = payment.legs[index].revision + 1;
            let replacement =
                self.disbursement_leg(engine, payment_id, &step, &recipient, revision)?;
            tracing::info!(
                payment = %payment_id,
                recipient = %recipient.id,
                old = %old,
                new = %replacement.transfer_id,
                "Disbursement leg reissued"
            );
            payment.legs[index] = replacement;
        }

        payment.status = PaymentStatus::Pending;
        payment.failure_reason = None;
        payment.updated_at = Utc::now();
        self.payments.update(payment.clone())?;
        self.run_legs(deals, engine, payment)
    }

    // -----------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------

    fn deposit_leg<L: FundsLedger>(
        &self,
        engine: &mut TransferEngine<L>,
        payment_id: PaymentId,
        step: &Step,
        deponent: &Deponent,
    ) -> Result<PaymentLeg> {
        let member_id = deponent.id.as_uuid();
        let transfer = engine.create_transfer(
            TransferRequest {
                from: self.deponent_account(deponent.beneficiary_id),
                to: self.escrow_account(step.id),
                amount: deponent.amount,
                currency: step.currency.to_string(),
                description: Some(format!("deposit into {}", step.id)),
            },
            &leg_key(payment_id, LegKind::Deposit, &member_id, 0),
        )?;
        Ok(PaymentLeg {
            kind: LegKind::Deposit,
            member_id,
            transfer_id: transfer.id,
            revision: 0,
        })
    }

    fn disbursement_leg<L: FundsLedger>(
        &self,
        engine: &mut TransferEngine<L>,
        payment_id: PaymentId,
        step: &Step,
        recipient: &Recipient,
        revision: u32,
    ) -> Result<PaymentLeg> {
        let member_id = recipient.id.as_uuid();
        let transfer = engine.create_transfer(
            TransferRequest {
                from: self.escrow_account(step.id),
                to: Self::payout_account(recipient),
                amount: recipient.amount,
                currency: step.currency.to_string(),
                description: Some(recipient.purpose.clone()),
            },
            &leg_key(payment_id, LegKind::Disbursement, &member_id, revision),
        )?;
        Ok(PaymentLeg {
            kind: LegKind::Disbursement,
            member_id,
            transfer_id: transfer.id,
            revision,
        })
    }

    /// Execute every unfinished leg in order, then settle the Payment.
    fn run_legs<L: FundsLedger>(
        &mut self,
        deals: &mut DealLifecycle,
        engine: &mut TransferEngine<L>,
        mut payment: Payment,
    ) -> Result<Payment> {
        let transfer_ids: Vec<TransferId> = payment.legs.iter().map(|l| l.transfer_id).collect();
        for transfer_id in transfer_ids {
            let transfer = engine.get_transfer(transfer_id)?;
            let outcome = match transfer.status {
                TransferStatus::Completed => continue,
                TransferStatus::Pending => engine.execute_transfer(transfer.id),
                TransferStatus::Failed => engine
                    .retry_transfer(transfer.id)
                    .and_then(|t| engine.execute_transfer(t.id)),
                TransferStatus::Cancelled => Err(DealflowError::Internal(format!(
                    "payment {} leg {} is cancelled",
                    payment.id, transfer.id
                ))),
            };
            if let Err(err) = outcome {
                return self.fail(deals, payment, err);
            }
        }

        deals.complete_step(payment.deal_id, payment.step_id)?;
        let now = Utc::now();
        payment.status = PaymentStatus::Completed;
        payment.completed_at = Some(now);
        payment.updated_at = now;
        self.payments.update(payment.clone())?;
        tracing::info!(
            payment = %payment.id,
            step = %payment.step_id,
            "Payment completed"
        );
        Ok(payment)
    }

    fn fail(
        &mut self,
        deals: &mut DealLifecycle,
        mut payment: Payment,
        err: DealflowError,
    ) -> Result<Payment> {
        let reason = err.to_string();
        payment.status = PaymentStatus::Failed;
        payment.failure_reason = Some(reason.clone());
        payment.updated_at = Utc::now();
        self.payments.update(payment.clone())?;
        deals.mark_payment_failed(payment.deal_id, &reason)?;
        tracing::warn!(payment = %payment.id, error = %err, "Payment failed");
        Err(err)
    }
}

/// Transfer idempotency key of one leg revision.
fn leg_key(
    payment_id: PaymentId,
    kind: LegKind,
    member: &impl std::fmt::Display,
    revision: u32,
) -> String {
    let tag = match kind {
        LegKind::Deposit => "dep",
        LegKind::Disbursement => "dis",
    };
    format!("payment:{}:{tag}:{member}:{revision}", payment_id.as_uuid())
}
