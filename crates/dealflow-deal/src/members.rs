//! Deponents and Recipients of a Step.
//!
//! Members are only edited while the owning Deal is DRAFT and the Step is
//! still open. The one exception is the bank-details correction used to
//! recover from a failed disbursement, which requires PAYMENT_FAILED.

use chrono::Utc;
use dealflow_types::{
    BankDetailsId, BeneficiaryId, DealStatus, DealflowError, Deponent, DeponentId, DeponentInput,
    IdempotencyRecord, Recipient, RecipientId, RecipientInput, RecipientUpdate, Result, Step,
    StepId, ensure_non_negative, ensure_positive, fingerprint, validate_key,
};
use rust_decimal::Decimal;

use crate::lifecycle::{DealLifecycle, ensure_deal_status, ensure_no_payment, ensure_step_open};
use crate::validator::DealReader;

impl DealLifecycle {
    // -----------------------------------------------------------------
    // Deponents
    // -----------------------------------------------------------------

    /// Create a Deponent, or update the amount of the existing one for the
    /// same beneficiary on this Step.
    ///
    /// # Errors
    /// - `InvalidStateTransition` unless the Deal is DRAFT and the Step open
    /// - `Validation` for a non-positive amount or unknown beneficiary
    pub fn upsert_deponent(&mut self, step_id: StepId, input: DeponentInput) -> Result<Deponent> {
        let mut step = self.editable_step(step_id, "change deponents of")?;
        ensure_positive(input.amount, "deponent amount")?;
        self.ensure_beneficiary(&input.beneficiary_id)?;
        let now = Utc::now();

        if let Some(mut existing) = self
            .step_deponents(&step)
            .into_iter()
            .find(|d| d.beneficiary_id == input.beneficiary_id)
        {
            existing.amount = input.amount;
            existing.updated_at = now;
            self.stores.deponents.update(existing.clone())?;
            tracing::info!(
                step = %step_id,
                deponent = %existing.id,
                amount = %existing.amount,
                "Deponent updated"
            );
            return Ok(existing);
        }

        let deponent = Deponent {
            id: DeponentId::new(),
            step_id,
            beneficiary_id: input.beneficiary_id,
            amount: input.amount,
            created_at: now,
            updated_at: now,
        };
        self.stores.deponents.create(deponent.clone())?;
        step.deponent_ids.push(deponent.id);
        step.updated_at = now;
        self.stores.steps.update(step)?;
        tracing::info!(
            step = %step_id,
            deponent = %deponent.id,
            amount = %deponent.amount,
            "Deponent added"
        );
        Ok(deponent)
    }

    pub fn get_deponent(&self, deponent_id: DeponentId) -> Result<Deponent> {
        self.stores.deponents.require(&deponent_id)
    }

    pub fn list_deponents(&self, step_id: StepId) -> Result<Vec<Deponent>> {
        let step = self.stores.steps.require(&step_id)?;
        Ok(self.step_deponents(&step))
    }

    pub fn delete_deponent(&mut self, deponent_id: DeponentId) -> Result<Deponent> {
        let deponent = self.get_deponent(deponent_id)?;
        let mut step = self.editable_step(deponent.step_id, "change deponents of")?;
        let deponent = self.stores.deponents.delete(&deponent_id)?;
        step.deponent_ids.retain(|id| *id != deponent_id);
        step.updated_at = Utc::now();
        self.stores.steps.update(step)?;
        tracing::info!(step = %deponent.step_id, deponent = %deponent_id, "Deponent removed");
        Ok(deponent)
    }

    // -----------------------------------------------------------------
    // Recipients
    // -----------------------------------------------------------------

    /// Add a Recipient to a Step.
    ///
    /// Replaying `idempotency_key` with an equivalent request returns the
    /// Recipient created by the first call.
    ///
    /// # Errors
    /// - `InvalidStateTransition` unless the Deal is DRAFT and the Step open
    /// - `Validation` for bad amounts, an unknown beneficiary, or bank
    ///   details not registered to the beneficiary
    /// - `DuplicateRequest` if the key was used for a different request
    pub fn create_recipient(
        &mut self,
        step_id: StepId,
        input: RecipientInput,
        idempotency_key: &str,
    ) -> Result<Recipient> {
        validate_key(idempotency_key)?;
        let key = format!("recipient:{idempotency_key}");
        let fp = fingerprint(&(
            step_id,
            input.beneficiary_id,
            input.bank_details_id,
            input.amount.normalize(),
            input.tax.normalize(),
            input.purpose.trim(),
        ))?;
        if let Some(existing) = self.idempotency.check(&key, &fp)? {
            tracing::debug!(key = idempotency_key, "Recipient creation replayed");
            return self
                .stores
                .recipients
                .require(&RecipientId::from_uuid(existing));
        }

        let mut step = self.editable_step(step_id, "change recipients of")?;
        check_amounts(input.amount, input.tax)?;
        let purpose = validate_purpose(&input.purpose)?;
        self.ensure_beneficiary(&input.beneficiary_id)?;
        self.ensure_bank_details(&input.beneficiary_id, &input.bank_details_id)?;

        let now = Utc::now();
        let recipient = Recipient {
            id: RecipientId::new(),
            step_id,
            beneficiary_id: input.beneficiary_id,
            bank_details_id: input.bank_details_id,
            amount: input.amount,
            tax: input.tax,
            purpose,
            created_at: now,
            updated_at: now,
        };
        self.stores.recipients.create(recipient.clone())?;
        step.recipient_ids.push(recipient.id);
        step.updated_at = now;
        self.stores.steps.update(step)?;
        self.idempotency.remember(
            &key,
            IdempotencyRecord {
                fingerprint: fp,
                resource_id: recipient.id.as_uuid(),
            },
        );
        tracing::info!(
            step = %step_id,
            recipient = %recipient.id,
            amount = %recipient.amount,
            "Recipient added"
        );
        Ok(recipient)
    }

    pub fn get_recipient(&self, recipient_id: RecipientId) -> Result<Recipient> {
        self.stores.recipients.require(&recipient_id)
    }

    pub fn list_recipients(&self, step_id: StepId) -> Result<Vec<Recipient>> {
        let step = self.stores.steps.require(&step_id)?;
        Ok(self.step_recipients(&step))
    }

    /// Partial update of a Recipient. Nothing is written unless the merged
    /// record is valid.
    pub fn update_recipient(
        &mut self,
        recipient_id: RecipientId,
        update: RecipientUpdate,
    ) -> Result<Recipient> {
        let mut recipient = self.get_recipient(recipient_id)?;
        self.editable_step(recipient.step_id, "change recipients of")?;

        if let Some(bank) = update.bank_details_id {
            self.ensure_bank_details(&recipient.beneficiary_id, &bank)?;
            recipient.bank_details_id = bank;
        }
        if let Some(amount) = update.amount {
            recipient.amount = amount;
        }
        if let Some(tax) = update.tax {
            recipient.tax = tax;
        }
        if let Some(purpose) = update.purpose {
            recipient.purpose = validate_purpose(&purpose)?;
        }
        check_amounts(recipient.amount, recipient.tax)?;
        recipient.updated_at = Utc::now();
        self.stores.recipients.update(recipient.clone())?;
        tracing::info!(recipient = %recipient_id, "Recipient updated");
        Ok(recipient)
    }

    pub fn delete_recipient(&mut self, recipient_id: RecipientId) -> Result<Recipient> {
        let recipient = self.get_recipient(recipient_id)?;
        let mut step = self.editable_step(recipient.step_id, "change recipients of")?;
        let recipient = self.stores.recipients.delete(&recipient_id)?;
        step.recipient_ids.retain(|id| *id != recipient_id);
        step.updated_at = Utc::now();
        self.stores.steps.update(step)?;
        tracing::info!(step = %recipient.step_id, recipient = %recipient_id, "Recipient removed");
        Ok(recipient)
    }

    /// Point a Recipient at different bank details after a failed payout.
    ///
    /// # Errors
    /// - `InvalidStateTransition` unless the Deal is PAYMENT_FAILED
    /// - `Validation` if the bank details do not belong to the Recipient's
    ///   beneficiary
    pub fn update_recipient_bank_details(
        &mut self,
        recipient_id: RecipientId,
        bank_details_id: BankDetailsId,
    ) -> Result<Recipient> {
        let mut recipient = self.get_recipient(recipient_id)?;
        let step = self.stores.steps.require(&recipient.step_id)?;
        let deal = self.get_deal(step.deal_id)?;
        ensure_deal_status(&deal, DealStatus::PaymentFailed, "update bank details in")?;
        self.ensure_bank_details(&recipient.beneficiary_id, &bank_details_id)?;

        let previous = recipient.bank_details_id;
        recipient.bank_details_id = bank_details_id;
        recipient.updated_at = Utc::now();
        self.stores.recipients.update(recipient.clone())?;
        tracing::info!(
            recipient = %recipient_id,
            from = %previous,
            to = %bank_details_id,
            "Recipient bank details replaced"
        );
        Ok(recipient)
    }

    // -----------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------

    /// Load a Step whose members may be edited.
    fn editable_step(&self, step_id: StepId, action: &'static str) -> Result<Step> {
        let step = self.stores.steps.require(&step_id)?;
        let deal = self.get_deal(step.deal_id)?;
        ensure_deal_status(&deal, DealStatus::Draft, action)?;
        ensure_step_open(&step, action)?;
        ensure_no_payment(&step, action)?;
        Ok(step)
    }

    fn ensure_bank_details(&self, beneficiary: &BeneficiaryId, bank: &BankDetailsId) -> Result<()> {
        if self.directory.has_bank_details(beneficiary, bank) {
            Ok(())
        } else {
            Err(DealflowError::validation(format!(
                "bank details {bank} are not registered to {beneficiary}"
            )))
        }
    }
}

/// `amount > 0` and `0 <= tax <= amount`.
fn check_amounts(amount: Decimal, tax: Decimal) -> Result<()> {
    ensure_positive(amount, "recipient amount")?;
    ensure_non_negative(tax, "recipient tax")?;
    if tax > amount {
        return Err(DealflowError::validation(format!(
            "recipient tax {tax} exceeds amount {amount}"
        )));
    }
    Ok(())
}

fn validate_purpose(purpose: &str) -> Result<String> {
    let purpose = purpose.trim();
    if purpose.is_empty() {
        return Err(DealflowError::validation("payment purpose must not be empty"));
    }
    Ok(purpose.to_string())
}
