//! Deal and Step state machines.

use std::sync::Arc;

use chrono::Utc;
use dealflow_types::{
    BeneficiaryDirectory, BeneficiaryId, Currency, Deal, DealConfig, DealId, DealStatus,
    DealUpdate, DealflowError, Deponent, IdempotencyGuard, IdempotencyRecord, IdempotencyStore,
    InMemoryRepository, NewDeal, NewStep, PaymentId, Recipient, Repository, Result,
    SettlementReport, Step, StepId, StepStatus, StepTotals, StepUpdate, constants,
    ensure_positive, ensure_same_currency, fingerprint, validate_key,
};

use crate::validator::{DealReader, SettlementValidator};

/// Storage for the deal aggregate, one repository per record type.
pub struct DealStores {
    pub deals: Box<dyn Repository<Deal>>,
    pub steps: Box<dyn Repository<Step>>,
    pub deponents: Box<dyn Repository<Deponent>>,
    pub recipients: Box<dyn Repository<Recipient>>,
}

impl DealStores {
    /// `HashMap`-backed stores.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            deals: Box::new(InMemoryRepository::<Deal>::new()),
            steps: Box::new(InMemoryRepository::<Step>::new()),
            deponents: Box::new(InMemoryRepository::<Deponent>::new()),
            recipients: Box::new(InMemoryRepository::<Recipient>::new()),
        }
    }
}

/// Owner of every Deal, Step, Deponent and Recipient.
pub struct DealLifecycle {
    pub(crate) config: DealConfig,
    pub(crate) stores: DealStores,
    pub(crate) directory: Arc<dyn BeneficiaryDirectory>,
    pub(crate) idempotency: Box<dyn IdempotencyStore>,
    pub(crate) validator: SettlementValidator,
}

impl DealLifecycle {
    /// Assemble a lifecycle from explicit collaborators.
    pub fn new(
        config: DealConfig,
        stores: DealStores,
        directory: Arc<dyn BeneficiaryDirectory>,
        idempotency: Box<dyn IdempotencyStore>,
    ) -> Self {
        Self {
            config,
            stores,
            directory,
            idempotency,
            validator: SettlementValidator::new(),
        }
    }

    /// In-memory stores and a bounded idempotency cache sized from `config`.
    pub fn in_memory(config: DealConfig, directory: Arc<dyn BeneficiaryDirectory>) -> Self {
        let idempotency = Box::new(IdempotencyGuard::new(config.idempotency_cache_size.max(1)));
        Self::new(config, DealStores::in_memory(), directory, idempotency)
    }

    // -----------------------------------------------------------------
    // Deals
    // -----------------------------------------------------------------

    /// Create a DRAFT Deal.
    ///
    /// Replaying `idempotency_key` with an equivalent request returns the
    /// Deal created by the first call.
    ///
    /// # Errors
    /// - `Validation` for a blank title, non-positive amount, malformed
    ///   currency, or unknown beneficiary
    /// - `DuplicateRequest` if the key was used for a different request
    pub fn create_deal(&mut self, input: NewDeal, idempotency_key: &str) -> Result<Deal> {
        validate_key(idempotency_key)?;
        let key = format!("deal:{idempotency_key}");
        let fp = fingerprint(&(
            input.title.trim(),
            input.amount.normalize(),
            input.currency.trim().to_ascii_uppercase(),
            input.beneficiary_id,
        ))?;
        if let Some(existing) = self.idempotency.check(&key, &fp)? {
            tracing::debug!(key = idempotency_key, "Deal creation replayed");
            return self.stores.deals.require(&DealId::from_uuid(existing));
        }

        let title = validate_title(&input.title)?;
        ensure_positive(input.amount, "deal amount")?;
        let currency = Currency::parse(&input.currency)?;
        self.ensure_beneficiary(&input.beneficiary_id)?;

        let now = Utc::now();
        let deal = Deal {
            id: DealId::new(),
            title,
            amount: input.amount,
            currency,
            status: DealStatus::Draft,
            beneficiary_id: input.beneficiary_id,
            step_ids: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            cancelled_at: None,
        };
        self.stores.deals.create(deal.clone())?;
        self.idempotency.remember(
            &key,
            IdempotencyRecord {
                fingerprint: fp,
                resource_id: deal.id.as_uuid(),
            },
        );
        tracing::info!(
            deal = %deal.id,
            amount = %deal.amount,
            currency = %deal.currency,
            "Deal created"
        );
        Ok(deal)
    }

    pub fn get_deal(&self, deal_id: DealId) -> Result<Deal> {
        self.stores.deals.require(&deal_id)
    }

    /// Edit a DRAFT Deal. Nothing is written unless every field is valid.
    ///
    /// # Errors
    /// `InvalidStateTransition` unless DRAFT; `Validation` for bad fields or a
    /// currency change on a Deal that already has Steps.
    pub fn update_deal(&mut self, deal_id: DealId, update: DealUpdate) -> Result<Deal> {
        let mut deal = self.get_deal(deal_id)?;
        ensure_deal_status(&deal, DealStatus::Draft, "update")?;

        if let Some(title) = update.title {
            deal.title = validate_title(&title)?;
        }
        if let Some(amount) = update.amount {
            ensure_positive(amount, "deal amount")?;
            deal.amount = amount;
        }
        if let Some(code) = update.currency {
            let currency = Currency::parse(&code)?;
            if currency != deal.currency && !deal.step_ids.is_empty() {
                return Err(DealflowError::validation(format!(
                    "cannot change currency of {} while it has steps",
                    deal.label()
                )));
            }
            deal.currency = currency;
        }
        deal.updated_at = Utc::now();
        self.stores.deals.update(deal.clone())?;
        tracing::info!(deal = %deal_id, "Deal updated");
        Ok(deal)
    }

    /// Delete a DRAFT Deal together with its Steps and their members.
    ///
    /// A Deal any of whose Steps has a Payment keeps its records.
    pub fn delete_deal(&mut self, deal_id: DealId) -> Result<Deal> {
        let deal = self.get_deal(deal_id)?;
        ensure_deal_status(&deal, DealStatus::Draft, "delete")?;
        let steps = self.steps_of(&deal);
        for step in &steps {
            ensure_no_payment(step, "delete deal of")?;
        }
        for step in steps {
            self.purge_step(&step)?;
        }
        let deal = self.stores.deals.delete(&deal_id)?;
        tracing::info!(deal = %deal_id, steps = deal.step_ids.len(), "Deal deleted");
        Ok(deal)
    }

    /// DRAFT → CONFIRMED. The Deal must reconcile.
    ///
    /// # Errors
    /// `InvalidStateTransition` unless DRAFT; `IncompleteSettlement` with the
    /// validator's reasons otherwise.
    pub fn confirm_deal(&mut self, deal_id: DealId) -> Result<Deal> {
        let deal = self.get_deal(deal_id)?;
        ensure_deal_status(&deal, DealStatus::Draft, "confirm")?;
        self.ensure_reconciled(deal_id)?;
        self.set_deal_status(deal, DealStatus::Confirmed)
    }

    /// DRAFT → ACCEPTED. Any other source status is rejected.
    ///
    /// # Errors
    /// `InvalidStateTransition` unless DRAFT; `IncompleteSettlement` if the
    /// Deal does not reconcile.
    pub fn accept_deal(&mut self, deal_id: DealId) -> Result<Deal> {
        let deal = self.get_deal(deal_id)?;
        ensure_deal_status(&deal, DealStatus::Draft, "accept")?;
        self.ensure_reconciled(deal_id)?;
        self.set_deal_status(deal, DealStatus::Accepted)
    }

    /// Any status except COMPLETED → CANCELLED. Steps are left as they are.
    pub fn cancel_deal(&mut self, deal_id: DealId) -> Result<Deal> {
        let mut deal = self.get_deal(deal_id)?;
        if !deal.status.can_transition_to(DealStatus::Cancelled) {
            return Err(DealflowError::invalid_transition(
                deal.label(),
                "cancel",
                deal.status,
                "any status except COMPLETED",
            ));
        }
        deal.cancelled_at = Some(Utc::now());
        self.set_deal_status(deal, DealStatus::Cancelled)
    }

    /// Any status except COMPLETED → DRAFT.
    pub fn move_to_draft(&mut self, deal_id: DealId) -> Result<Deal> {
        let deal = self.get_deal(deal_id)?;
        if !deal.status.can_transition_to(DealStatus::Draft) {
            return Err(DealflowError::invalid_transition(
                deal.label(),
                "move to draft",
                deal.status,
                "any status except COMPLETED",
            ));
        }
        self.set_deal_status(deal, DealStatus::Draft)
    }

    /// ACCEPTED → COMPLETED once every Step is COMPLETED.
    ///
    /// # Errors
    /// - `IncompleteSteps` if any Step is NEW, ACTIVE or CANCELLED, or the
    ///   Deal has no Steps
    /// - `InvalidStateTransition` unless ACCEPTED
    pub fn complete_deal(&mut self, deal_id: DealId) -> Result<Deal> {
        let mut deal = self.get_deal(deal_id)?;
        let steps = self.steps_of(&deal);
        let pending = steps
            .iter()
            .filter(|s| s.status != StepStatus::Completed)
            .count();
        if pending > 0 || steps.is_empty() {
            tracing::warn!(deal = %deal_id, pending, "Deal completion rejected");
            return Err(DealflowError::IncompleteSteps { deal_id, pending });
        }
        ensure_deal_status(&deal, DealStatus::Accepted, "complete")?;
        deal.completed_at = Some(Utc::now());
        self.set_deal_status(deal, DealStatus::Completed)
    }

    /// ACCEPTED → PAYMENT_FAILED after a disbursement failure.
    pub fn mark_payment_failed(&mut self, deal_id: DealId, reason: &str) -> Result<Deal> {
        let deal = self.get_deal(deal_id)?;
        ensure_deal_status(&deal, DealStatus::Accepted, "mark payment failed on")?;
        tracing::warn!(deal = %deal_id, reason, "Deal payment failed");
        self.set_deal_status(deal, DealStatus::PaymentFailed)
    }

    /// PAYMENT_FAILED → ACCEPTED, so payment can be retried.
    ///
    /// Steps bound to a Payment stay bound; they are only paid by retrying it.
    pub fn resume_after_payment_failure(&mut self, deal_id: DealId) -> Result<Deal> {
        let deal = self.get_deal(deal_id)?;
        ensure_deal_status(&deal, DealStatus::PaymentFailed, "resume")?;
        self.set_deal_status(deal, DealStatus::Accepted)
    }

    /// Reconciliation report for the whole Deal. Never fails.
    pub fn is_deal_valid(&self, deal_id: DealId) -> SettlementReport {
        self.validator.is_deal_valid(self, deal_id)
    }

    // -----------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------

    /// Steps of a Deal, ordered by sequence.
    pub fn list_steps(&self, deal_id: DealId) -> Result<Vec<Step>> {
        let deal = self.get_deal(deal_id)?;
        Ok(self.steps_of(&deal))
    }

    /// Append a NEW Step to a Deal.
    ///
    /// # Errors
    /// - `InvalidStateTransition` if the Deal is COMPLETED or CANCELLED
    /// - `Validation` for a bad title or amount, a currency other than the
    ///   Deal's, or a Deal already at the configured step limit
    pub fn create_step(&mut self, deal_id: DealId, input: NewStep) -> Result<Step> {
        let mut deal = self.get_deal(deal_id)?;
        if matches!(deal.status, DealStatus::Completed | DealStatus::Cancelled) {
            return Err(DealflowError::invalid_transition(
                deal.label(),
                "add step to",
                deal.status,
                "not COMPLETED or CANCELLED",
            ));
        }
        let title = validate_title(&input.title)?;
        ensure_positive(input.amount, "step amount")?;
        let currency = Currency::parse(&input.currency)?;
        ensure_same_currency(&deal.currency, &currency, "deal")?;
        if deal.step_ids.len() >= self.config.max_steps_per_deal {
            return Err(DealflowError::validation(format!(
                "{} already has the maximum of {} steps",
                deal.label(),
                self.config.max_steps_per_deal
            )));
        }

        let sequence = self
            .steps_of(&deal)
            .iter()
            .map(|s| s.sequence)
            .max()
            .map_or(constants::FIRST_STEP_SEQUENCE, |last| last + 1);
        let now = Utc::now();
        let step = Step {
            id: StepId::new(),
            deal_id,
            sequence,
            title,
            amount: input.amount,
            currency,
            status: StepStatus::New,
            deponent_ids: Vec::new(),
            recipient_ids: Vec::new(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            payment_id: None,
        };
        self.stores.steps.create(step.clone())?;
        deal.step_ids.push(step.id);
        deal.updated_at = now;
        self.stores.deals.update(deal)?;
        tracing::info!(deal = %deal_id, step = %step.id, sequence, "Step created");
        Ok(step)
    }

    pub fn get_step(&self, deal_id: DealId, step_id: StepId) -> Result<Step> {
        self.scoped_step(deal_id, step_id).map(|(_, step)| step)
    }

    /// Edit title/amount of an open Step while the Deal is DRAFT.
    pub fn update_step(
        &mut self,
        deal_id: DealId,
        step_id: StepId,
        update: StepUpdate,
    ) -> Result<Step> {
        let (deal, mut step) = self.scoped_step(deal_id, step_id)?;
        ensure_deal_status(&deal, DealStatus::Draft, "update step of")?;
        ensure_step_open(&step, "update")?;
        ensure_no_payment(&step, "update")?;
        if let Some(title) = update.title {
            step.title = validate_title(&title)?;
        }
        if let Some(amount) = update.amount {
            ensure_positive(amount, "step amount")?;
            step.amount = amount;
        }
        step.updated_at = Utc::now();
        self.stores.steps.update(step.clone())?;
        tracing::info!(step = %step_id, "Step updated");
        Ok(step)
    }

    /// Delete a NEW or ACTIVE Step and its members. A Step with a Payment
    /// cannot be deleted: its escrow may hold funds.
    pub fn delete_step(&mut self, deal_id: DealId, step_id: StepId) -> Result<Step> {
        let (mut deal, step) = self.scoped_step(deal_id, step_id)?;
        if deal.status.is_final() {
            return Err(DealflowError::invalid_transition(
                deal.label(),
                "delete step of",
                deal.status,
                "not COMPLETED",
            ));
        }
        ensure_step_open(&step, "delete")?;
        ensure_no_payment(&step, "delete")?;
        self.purge_step(&step)?;
        deal.step_ids.retain(|id| *id != step_id);
        deal.updated_at = Utc::now();
        self.stores.deals.update(deal)?;
        tracing::info!(deal = %deal_id, step = %step_id, "Step deleted");
        Ok(step)
    }

    /// NEW → ACTIVE. The Deal must be ACCEPTED.
    pub fn start_step(&mut self, deal_id: DealId, step_id: StepId) -> Result<Step> {
        let (deal, mut step) = self.scoped_step(deal_id, step_id)?;
        ensure_deal_status(&deal, DealStatus::Accepted, "start step of")?;
        if step.status != StepStatus::New {
            return Err(DealflowError::invalid_transition(
                step_label(&step),
                "start",
                step.status,
                "NEW",
            ));
        }
        let now = Utc::now();
        step.status = StepStatus::Active;
        step.started_at = Some(now);
        step.updated_at = now;
        self.stores.steps.update(step.clone())?;
        tracing::info!(deal = %deal_id, step = %step_id, "Step started");
        Ok(step)
    }

    /// NEW or ACTIVE → CANCELLED, unless a Payment was started for the Step.
    pub fn cancel_step(&mut self, deal_id: DealId, step_id: StepId) -> Result<Step> {
        let (_, mut step) = self.scoped_step(deal_id, step_id)?;
        if !step.status.can_transition_to(StepStatus::Cancelled) {
            return Err(DealflowError::invalid_transition(
                step_label(&step),
                "cancel",
                step.status,
                "NEW or ACTIVE",
            ));
        }
        ensure_no_payment(&step, "cancel")?;
        let now = Utc::now();
        step.status = StepStatus::Cancelled;
        step.cancelled_at = Some(now);
        step.updated_at = now;
        self.stores.steps.update(step.clone())?;
        tracing::info!(deal = %deal_id, step = %step_id, "Step cancelled");
        Ok(step)
    }

    /// ACTIVE → COMPLETED, provided the Step reconciles.
    ///
    /// # Errors
    /// `InvalidStateTransition` unless ACTIVE; `IncompleteSettlement` if the
    /// Step lacks deponents or recipients, or deposits fall short.
    pub fn complete_step(&mut self, deal_id: DealId, step_id: StepId) -> Result<Step> {
        let (_, mut step) = self.scoped_step(deal_id, step_id)?;
        if step.status != StepStatus::Active {
            return Err(DealflowError::invalid_transition(
                step_label(&step),
                "complete",
                step.status,
                "ACTIVE",
            ));
        }
        let reasons = self.validator.validate_step(self, &step);
        if !reasons.is_empty() {
            tracing::warn!(
                step = %step_id,
                reasons = reasons.len(),
                "Step completion rejected"
            );
            return Err(DealflowError::IncompleteSettlement { reasons });
        }
        let now = Utc::now();
        step.status = StepStatus::Completed;
        step.completed_at = Some(now);
        step.updated_at = now;
        self.stores.steps.update(step.clone())?;
        tracing::info!(deal = %deal_id, step = %step_id, "Step completed");
        Ok(step)
    }

    /// Record that `payment_id` is moving funds for an open Step.
    ///
    /// From then on the Step cannot be edited, cancelled or deleted, and a
    /// second Payment cannot be bound to it.
    ///
    /// # Errors
    /// `InvalidStateTransition` unless the Step is NEW or ACTIVE and has no
    /// Payment yet.
    pub fn bind_payment(
        &mut self,
        deal_id: DealId,
        step_id: StepId,
        payment_id: PaymentId,
    ) -> Result<Step> {
        let (_, mut step) = self.scoped_step(deal_id, step_id)?;
        ensure_step_open(&step, "bind payment to")?;
        ensure_no_payment(&step, "bind payment to")?;
        step.payment_id = Some(payment_id);
        step.updated_at = Utc::now();
        self.stores.steps.update(step.clone())?;
        tracing::info!(step = %step_id, payment = %payment_id, "Payment bound to step");
        Ok(step)
    }

    /// Reconciliation report for a single Step.
    pub fn validate_step(&self, deal_id: DealId, step_id: StepId) -> Result<SettlementReport> {
        let (_, step) = self.scoped_step(deal_id, step_id)?;
        Ok(SettlementReport::from_reasons(
            self.validator.validate_step(self, &step),
        ))
    }

    pub fn step_totals(&self, deal_id: DealId, step_id: StepId) -> Result<StepTotals> {
        let (_, step) = self.scoped_step(deal_id, step_id)?;
        Ok(self.validator.step_totals(self, &step))
    }

    // -----------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------

    pub(crate) fn steps_of(&self, deal: &Deal) -> Vec<Step> {
        let mut steps: Vec<Step> = deal
            .step_ids
            .iter()
            .filter_map(|id| self.stores.steps.get(id))
            .collect();
        steps.sort_by_key(|s| s.sequence);
        steps
    }

    /// Load a Deal and one of its Steps; a Step of another Deal is `NotFound`.
    pub(crate) fn scoped_step(&self, deal_id: DealId, step_id: StepId) -> Result<(Deal, Step)> {
        let deal = self.get_deal(deal_id)?;
        match self.stores.steps.get(&step_id) {
            Some(step) if step.deal_id == deal_id => Ok((deal, step)),
            _ => Err(DealflowError::not_found("step", step_id)),
        }
    }

    pub(crate) fn ensure_beneficiary(&self, id: &BeneficiaryId) -> Result<()> {
        if self.directory.has_beneficiary(id) {
            Ok(())
        } else {
            Err(DealflowError::validation(format!(
                "beneficiary {id} is not registered"
            )))
        }
    }

    fn ensure_reconciled(&self, deal_id: DealId) -> Result<()> {
        let report = self.is_deal_valid(deal_id);
        if report.is_valid {
            return Ok(());
        }
        tracing::warn!(
            deal = %deal_id,
            reasons = report.reasons.len(),
            "Deal does not reconcile"
        );
        Err(DealflowError::IncompleteSettlement {
            reasons: report.reasons,
        })
    }

    fn set_deal_status(&mut self, mut deal: Deal, target: DealStatus) -> Result<Deal> {
        let from = deal.status;
        deal.status = target;
        deal.updated_at = Utc::now();
        self.stores.deals.update(deal.clone())?;
        tracing::info!(deal = %deal.id, from = %from, to = %target, "Deal status changed");
        Ok(deal)
    }

    fn purge_step(&mut self, step: &Step) -> Result<()> {
        for id in &step.deponent_ids {
            self.stores.deponents.delete(id)?;
        }
        for id in &step.recipient_ids {
            self.stores.recipients.delete(id)?;
        }
        self.stores.steps.delete(&step.id)?;
        Ok(())
    }
}

impl DealReader for DealLifecycle {
    fn find_deal(&self, id: &DealId) -> Option<Deal> {
        self.stores.deals.get(id)
    }

    fn deal_steps(&self, deal: &Deal) -> Vec<Step> {
        self.steps_of(deal)
    }

    fn step_deponents(&self, step: &Step) -> Vec<Deponent> {
        step.deponent_ids
            .iter()
            .filter_map(|id| self.stores.deponents.get(id))
            .collect()
    }

    fn step_recipients(&self, step: &Step) -> Vec<Recipient> {
        step.recipient_ids
            .iter()
            .filter_map(|id| self.stores.recipients.get(id))
            .collect()
    }
}

pub(crate) fn ensure_deal_status(
    deal: &Deal,
    required: DealStatus,
    action: &'static str,
) -> Result<()> {
    if deal.status == required {
        return Ok(());
    }
    Err(DealflowError::invalid_transition(
        deal.label(),
        action,
        deal.status,
        required.to_string(),
    ))
}

pub(crate) fn ensure_step_open(step: &Step, action: &'static str) -> Result<()> {
    if step.status.is_open() {
        return Ok(());
    }
    Err(DealflowError::invalid_transition(
        step_label(step),
        action,
        step.status,
        "NEW or ACTIVE",
    ))
}

/// A Step whose Payment already moved funds stays under that Payment's control.
pub(crate) fn ensure_no_payment(step: &Step, action: &'static str) -> Result<()> {
    match step.payment_id {
        None => Ok(()),
        Some(payment_id) => Err(DealflowError::invalid_transition(
            step_label(step),
            action,
            format!("{} with {payment_id}", step.status),
            "no payment started",
        )),
    }
}

pub(crate) fn step_label(step: &Step) -> String {
    step.id.to_string()
}

fn validate_title(title: &str) -> Result<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(DealflowError::validation("title must not be empty"));
    }
    if title.len() > constants::MAX_TITLE_LEN {
        return Err(DealflowError::validation(format!(
            "title exceeds {} bytes",
            constants::MAX_TITLE_LEN
        )));
    }
    Ok(title.to_string())
}
