//! Deposit/disbursement reconciliation.
//!
//! For a Deal to be payable, every Step, cancelled ones included, needs at
//! least one Deponent, at least one Recipient, and deposits covering
//! disbursements:
//!
//! ```text
//! Σ deponent.amount  >=  Σ recipient.amount      (per Step)
//! ```
//!
//! The validator never errors on an unready Deal. It reports every problem
//! it finds, in Step sequence order.

use dealflow_types::{
    Deal, DealId, Deponent, ReasonCode, ReasonDetails, Recipient, SettlementReport, Step,
    StepTotals, ValidationReason,
};
use rust_decimal::Decimal;

/// Read access to the deal aggregate.
pub trait DealReader {
    fn find_deal(&self, id: &DealId) -> Option<Deal>;
    /// Steps of `deal`, ordered by sequence.
    fn deal_steps(&self, deal: &Deal) -> Vec<Step>;
    fn step_deponents(&self, step: &Step) -> Vec<Deponent>;
    fn step_recipients(&self, step: &Step) -> Vec<Recipient>;
}

/// Stateless reconciliation of a Deal's deposits against its disbursements.
#[derive(Debug, Clone, Copy, Default)]
pub struct SettlementValidator;

impl SettlementValidator {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Check whether `deal_id` is ready for payment.
    pub fn is_deal_valid<R: DealReader + ?Sized>(
        &self,
        reader: &R,
        deal_id: DealId,
    ) -> SettlementReport {
        let Some(deal) = reader.find_deal(&deal_id) else {
            return SettlementReport::from_reasons(vec![ValidationReason::new(
                ReasonCode::DealNotFound,
                format!("Deal {deal_id} not found"),
            )]);
        };

        let steps = reader.deal_steps(&deal);
        if steps.is_empty() {
            return SettlementReport::from_reasons(vec![ValidationReason::new(
                ReasonCode::NoStepsInDeal,
                format!("Deal {deal_id} has no steps"),
            )]);
        }

        let reasons = steps
            .iter()
            .flat_map(|step| self.validate_step(reader, step))
            .collect();
        SettlementReport::from_reasons(reasons)
    }

    /// Reasons `step` cannot be paid out. Empty when it can.
    pub fn validate_step<R: DealReader + ?Sized>(
        &self,
        reader: &R,
        step: &Step,
    ) -> Vec<ValidationReason> {
        let deponents = reader.step_deponents(step);
        let recipients = reader.step_recipients(step);
        let mut reasons = Vec::new();

        if deponents.is_empty() {
            reasons.push(
                ValidationReason::new(
                    ReasonCode::NoDeponentsInStep,
                    format!("Step {} has no deponents", step.sequence),
                )
                .with_details(ReasonDetails::Step { step_id: step.id }),
            );
        }
        if recipients.is_empty() {
            reasons.push(
                ValidationReason::new(
                    ReasonCode::NoRecipientsInStep,
                    format!("Step {} has no recipients", step.sequence),
                )
                .with_details(ReasonDetails::Step { step_id: step.id }),
            );
        }

        let totals = totals_of(&deponents, &recipients);
        if !totals.is_covered() {
            reasons.push(
                ValidationReason::new(
                    ReasonCode::InsufficientDeposits,
                    format!(
                        "Step {} deposits {} do not cover disbursements {}",
                        step.sequence, totals.deposited, totals.required
                    ),
                )
                .with_details(ReasonDetails::Deposits {
                    step_id: step.id,
                    total_deposited: totals.deposited,
                    total_required: totals.required,
                }),
            );
        }
        reasons
    }

    /// Deposit and disbursement sums of `step`.
    pub fn step_totals<R: DealReader + ?Sized>(&self, reader: &R, step: &Step) -> StepTotals {
        totals_of(&reader.step_deponents(step), &reader.step_recipients(step))
    }
}

fn totals_of(deponents: &[Deponent], recipients: &[Recipient]) -> StepTotals {
    StepTotals {
        deposited: deponents.iter().map(|d| d.amount).sum::<Decimal>(),
        required: recipients.iter().map(|r| r.amount).sum::<Decimal>(),
    }
}
