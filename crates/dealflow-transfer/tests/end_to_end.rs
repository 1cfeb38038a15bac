//! End-to-end: ledger funds moving through transfers and step payments.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dealflow_deal::DealLifecycle;
use dealflow_ledger::Ledger;
use dealflow_transfer::{FundsLedger, PaymentCoordinator, TransferEngine};
use dealflow_types::fixtures::{dec, directory_with, new_deal, new_step, recipient_input, rub};
use dealflow_types::{
    AccountRef, Balance, BankDetailsId, BeneficiaryId, Currency, DealId, DealStatus,
    DealflowConfig, DealflowError, DeponentInput, PaymentStatus, Result, StepId, StepStatus,
    TransferRequest, TransferStatus,
};
use rust_decimal::Decimal;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn request(from: &AccountRef, to: &AccountRef, amount: i64) -> TransferRequest {
    TransferRequest {
        from: from.clone(),
        to: to.clone(),
        amount: dec(amount),
        currency: "RUB".into(),
        description: Some("rent".into()),
    }
}

fn amount_of<L: FundsLedger>(ledger: &L, account: &AccountRef) -> Decimal {
    ledger.balance(account).map_or(Decimal::ZERO, |b| b.amount)
}

// =========================================================================
// Transfers
// =========================================================================

#[test]
fn transfer_without_funds_fails_and_moves_nothing() {
    init_tracing();
    let ledger = Arc::new(Ledger::default());
    let mut engine = TransferEngine::in_memory(Arc::clone(&ledger), &Default::default());
    let a = AccountRef::beneficiary(BeneficiaryId::new());
    let b = AccountRef::beneficiary(BeneficiaryId::new());
    ledger.add_funds(&a, dec(50), &rub()).unwrap();

    let transfer = engine.create_transfer(request(&a, &b, 100), "t-1").unwrap();
    assert_eq!(transfer.status, TransferStatus::Pending);

    let err = engine.execute_transfer(transfer.id).unwrap_err();
    assert_eq!(
        err,
        DealflowError::InsufficientFunds {
            needed: dec(100),
            available: dec(50)
        }
    );

    let stored = engine.get_transfer(transfer.id).unwrap();
    assert_eq!(stored.status, TransferStatus::Failed);
    assert!(stored.failure_reason.unwrap().contains("DF_ERR_400"));
    assert!(stored.failed_at.is_some());
    assert!(stored.debited_at.is_none());
    assert_eq!(amount_of(&*ledger, &a), dec(50));
    assert!(ledger.balance(&b).is_err());
}

#[test]
fn replayed_create_returns_one_record() {
    let ledger = Arc::new(Ledger::default());
    let mut engine = TransferEngine::in_memory(Arc::clone(&ledger), &Default::default());
    let a = AccountRef::beneficiary(BeneficiaryId::new());
    let b = AccountRef::beneficiary(BeneficiaryId::new());

    let first = engine.create_transfer(request(&a, &b, 10), "same").unwrap();
    let second = engine.create_transfer(request(&a, &b, 10), "same").unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(engine.list_transfers(&a).len(), 1);

    let err = engine.create_transfer(request(&a, &b, 11), "same").unwrap_err();
    assert!(matches!(err, DealflowError::DuplicateRequest { .. }));
}

/// Ledger that fails the next `failing_credits` credits.
struct FlakyLedger {
    inner: Ledger,
    failing_credits: AtomicUsize,
    withdrawals: AtomicUsize,
}

impl FlakyLedger {
    fn new(failing_credits: usize) -> Self {
        Self {
            inner: Ledger::default(),
            failing_credits: AtomicUsize::new(failing_credits),
            withdrawals: AtomicUsize::new(0),
        }
    }
}

impl FundsLedger for FlakyLedger {
    fn balance(&self, account: &AccountRef) -> Result<Balance> {
        self.inner.balance(account)
    }

    fn withdraw_funds(
        &self,
        account: &AccountRef,
        amount: Decimal,
        currency: &Currency,
    ) -> Result<Balance> {
        self.withdrawals.fetch_add(1, Ordering::SeqCst);
        self.inner.withdraw_funds(account, amount, currency)
    }

    fn add_funds(
        &self,
        account: &AccountRef,
        amount: Decimal,
        currency: &Currency,
    ) -> Result<Balance> {
        let failing = self
            .failing_credits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(DealflowError::Internal("credit rejected".into()));
        }
        self.inner.add_funds(account, amount, currency)
    }
}

#[test]
fn failed_credit_is_finished_by_retry_without_second_debit() {
    init_tracing();
    let ledger = Arc::new(FlakyLedger::new(1));
    let mut engine = TransferEngine::in_memory(Arc::clone(&ledger), &Default::default());
    let a = AccountRef::beneficiary(BeneficiaryId::new());
    let b = AccountRef::beneficiary(BeneficiaryId::new());
    ledger.inner.add_funds(&a, dec(100), &rub()).unwrap();

    let transfer = engine.create_transfer(request(&a, &b, 60), "t-1").unwrap();
    let err = engine.execute_transfer(transfer.id).unwrap_err();
    assert!(matches!(err, DealflowError::Internal(_)));

    let failed = engine.get_transfer(transfer.id).unwrap();
    assert_eq!(failed.status, TransferStatus::Failed);
    assert!(failed.awaits_credit());
    assert_eq!(amount_of(&*ledger, &a), dec(40));
    assert_eq!(amount_of(&*ledger, &b), Decimal::ZERO);

    // A FAILED transfer is not executed again without an explicit retry.
    let err = engine.execute_transfer(transfer.id).unwrap_err();
    assert!(matches!(err, DealflowError::InvalidStateTransition { .. }));
    assert_eq!(amount_of(&*ledger, &a), dec(40));

    engine.retry_transfer(transfer.id).unwrap();
    let done = engine.execute_transfer(transfer.id).unwrap();
    assert_eq!(done.status, TransferStatus::Completed);
    assert_eq!(done.attempts, 2);
    assert_eq!(ledger.withdrawals.load(Ordering::SeqCst), 1);
    assert_eq!(amount_of(&*ledger, &a), dec(40));
    assert_eq!(amount_of(&*ledger, &b), dec(60));

    let err = engine.cancel_transfer(transfer.id).unwrap_err();
    assert!(matches!(err, DealflowError::InvalidStateTransition { .. }));
}

// =========================================================================
// Step payments
// =========================================================================

struct World {
    config: DealflowConfig,
    ledger: Arc<Ledger>,
    engine: TransferEngine,
    deals: DealLifecycle,
    payments: PaymentCoordinator,
    owner: BeneficiaryId,
    deponent: BeneficiaryId,
    recipient: (BeneficiaryId, BankDetailsId),
    spare_bank: BankDetailsId,
}

fn world() -> World {
    init_tracing();
    let config = DealflowConfig::default();
    let (mut dir, parties) = directory_with(3);
    let spare_bank = dir.add_bank_details(parties[2].0);
    let ledger = Arc::new(Ledger::new(config.ledger.clone()));
    World {
        engine: TransferEngine::in_memory(Arc::clone(&ledger), &config.transfers),
        deals: DealLifecycle::in_memory(config.deals.clone(), Arc::new(dir)),
        payments: PaymentCoordinator::in_memory(&config),
        ledger,
        config,
        owner: parties[0].0,
        deponent: parties[1].0,
        recipient: parties[2],
        spare_bank,
    }
}

/// ACCEPTED deal of 800000 RUB with one balanced Step and a funded deponent.
fn accepted_deal(w: &mut World) -> (DealId, StepId) {
    let deal = w.deals.create_deal(new_deal(w.owner, 800_000), "deal").unwrap();
    let step = w.deals.create_step(deal.id, new_step(800_000)).unwrap();
    w.deals
        .upsert_deponent(
            step.id,
            DeponentInput {
                beneficiary_id: w.deponent,
                amount: dec(800_000),
            },
        )
        .unwrap();
    w.deals
        .create_recipient(
            step.id,
            recipient_input(w.recipient.0, w.recipient.1, 800_000),
            "rcp",
        )
        .unwrap();
    w.deals.accept_deal(deal.id).unwrap();
    w.ledger
        .add_funds(
            &w.payments.deponent_account(w.deponent),
            dec(800_000),
            &rub(),
        )
        .unwrap();
    (deal.id, step.id)
}

#[test]
fn step_payment_moves_funds_through_escrow() {
    let mut w = world();
    let (deal_id, step_id) = accepted_deal(&mut w);

    let payment = w
        .payments
        .disburse_step(&mut w.deals, &mut w.engine, deal_id, step_id, "pay-1")
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert_eq!(payment.legs.len(), 2);
    assert!(payment.completed_at.is_some());

    let step = w.deals.get_step(deal_id, step_id).unwrap();
    assert_eq!(step.status, StepStatus::Completed);

    let deponent = w.payments.deponent_account(w.deponent);
    let escrow = w.payments.escrow_account(step_id);
    let recipient = w.deals.list_recipients(step_id).unwrap().remove(0);
    let payout = PaymentCoordinator::payout_account(&recipient);
    assert_eq!(amount_of(&*w.ledger, &deponent), Decimal::ZERO);
    assert_eq!(amount_of(&*w.ledger, &escrow), Decimal::ZERO);
    assert_eq!(amount_of(&*w.ledger, &payout), dec(800_000));
    assert_eq!(w.ledger.total_amount(&rub()).unwrap(), dec(800_000));
    assert_eq!(escrow.account, w.config.ledger.escrow_account);

    let deal = w.deals.complete_deal(deal_id).unwrap();
    assert_eq!(deal.status, DealStatus::Completed);
}

#[test]
fn replayed_payment_returns_same_record() {
    let mut w = world();
    let (deal_id, step_id) = accepted_deal(&mut w);

    let first = w
        .payments
        .disburse_step(&mut w.deals, &mut w.engine, deal_id, step_id, "pay-1")
        .unwrap();
    let again = w
        .payments
        .disburse_step(&mut w.deals, &mut w.engine, deal_id, step_id, "pay-1")
        .unwrap();
    assert_eq!(first, again);

    let payout = PaymentCoordinator::payout_account(
        &w.deals.list_recipients(step_id).unwrap().remove(0),
    );
    assert_eq!(amount_of(&*w.ledger, &payout), dec(800_000));
}

#[test]
fn payment_requires_accepted_deal() {
    let mut w = world();
    let deal = w.deals.create_deal(new_deal(w.owner, 100), "deal").unwrap();
    let step = w.deals.create_step(deal.id, new_step(100)).unwrap();

    let err = w
        .payments
        .disburse_step(&mut w.deals, &mut w.engine, deal.id, step.id, "pay-1")
        .unwrap_err();
    assert!(matches!(err, DealflowError::InvalidStateTransition { .. }));
    assert_eq!(
        w.deals.get_step(deal.id, step.id).unwrap().status,
        StepStatus::New
    );
}

#[test]
fn underfunded_deponent_fails_payment_until_topped_up() {
    let mut w = world();
    let (deal_id, step_id) = accepted_deal(&mut w);
    let deponent = w.payments.deponent_account(w.deponent);
    w.ledger.withdraw_funds(&deponent, dec(1), &rub()).unwrap();

    let err = w
        .payments
        .disburse_step(&mut w.deals, &mut w.engine, deal_id, step_id, "pay-1")
        .unwrap_err();
    assert!(matches!(err, DealflowError::InsufficientFunds { .. }));
    assert_eq!(
        w.deals.get_deal(deal_id).unwrap().status,
        DealStatus::PaymentFailed
    );
    assert_eq!(amount_of(&*w.ledger, &deponent), dec(799_999));

    w.ledger.add_funds(&deponent, dec(1), &rub()).unwrap();
    let deposits = w.engine.list_transfers(&deponent);
    assert_eq!(deposits.len(), 1);

    // The failed Payment is found through its replayed request.
    let failed = w
        .payments
        .disburse_step(&mut w.deals, &mut w.engine, deal_id, step_id, "pay-1")
        .unwrap();
    assert_eq!(failed.status, PaymentStatus::Failed);

    let done = w
        .payments
        .retry_payment(&mut w.deals, &mut w.engine, failed.id)
        .unwrap();
    assert_eq!(done.status, PaymentStatus::Completed);
    assert_eq!(amount_of(&*w.ledger, &deponent), Decimal::ZERO);
    assert_eq!(w.engine.list_transfers(&deponent).len(), 1);
}

#[test]
fn new_bank_details_recover_failed_disbursement() {
    let mut w = world();
    let (deal_id, step_id) = accepted_deal(&mut w);
    let recipient = w.deals.list_recipients(step_id).unwrap().remove(0);

    // The original payout account holds another currency, so crediting it fails.
    let original = PaymentCoordinator::payout_account(&recipient);
    w.ledger
        .open_account(&original, &Currency::parse("USD").unwrap())
        .unwrap();

    let err = w
        .payments
        .disburse_step(&mut w.deals, &mut w.engine, deal_id, step_id, "pay-1")
        .unwrap_err();
    assert!(matches!(err, DealflowError::Validation { .. }));
    assert_eq!(
        w.deals.get_deal(deal_id).unwrap().status,
        DealStatus::PaymentFailed
    );
    let escrow = w.payments.escrow_account(step_id);
    assert_eq!(amount_of(&*w.ledger, &escrow), dec(800_000));

    let failed = w
        .payments
        .disburse_step(&mut w.deals, &mut w.engine, deal_id, step_id, "pay-1")
        .unwrap();
    assert_eq!(failed.status, PaymentStatus::Failed);
    assert!(failed.failure_reason.is_some());

    let updated = w
        .deals
        .update_recipient_bank_details(recipient.id, w.spare_bank)
        .unwrap();
    let done = w
        .payments
        .retry_payment(&mut w.deals, &mut w.engine, failed.id)
        .unwrap();
    assert_eq!(done.status, PaymentStatus::Completed);
    assert_eq!(done.legs[1].revision, 1);
    assert_ne!(done.legs[1].transfer_id, failed.legs[1].transfer_id);

    let old_leg = w.engine.get_transfer(failed.legs[1].transfer_id).unwrap();
    assert_eq!(old_leg.status, TransferStatus::Cancelled);

    let payout = PaymentCoordinator::payout_account(&updated);
    assert_eq!(amount_of(&*w.ledger, &payout), dec(800_000));
    assert_eq!(amount_of(&*w.ledger, &escrow), Decimal::ZERO);
    assert_eq!(amount_of(&*w.ledger, &original), Decimal::ZERO);

    let deal = w.deals.complete_deal(deal_id).unwrap();
    assert_eq!(deal.status, DealStatus::Completed);
}

/// Fails the first Payment of the Step at its disbursement leg, with escrow
/// holding the deposit and the deponent funded for a second debit.
fn failed_disbursement(w: &mut World) -> (DealId, StepId, AccountRef) {
    let (deal_id, step_id) = accepted_deal(w);
    let deponent = w.payments.deponent_account(w.deponent);
    w.ledger.add_funds(&deponent, dec(800_000), &rub()).unwrap();
    let recipient = w.deals.list_recipients(step_id).unwrap().remove(0);
    w.ledger
        .open_account(
            &PaymentCoordinator::payout_account(&recipient),
            &Currency::parse("USD").unwrap(),
        )
        .unwrap();

    let err = w
        .payments
        .disburse_step(&mut w.deals, &mut w.engine, deal_id, step_id, "pay-1")
        .unwrap_err();
    assert!(matches!(err, DealflowError::Validation { .. }));
    (deal_id, step_id, deponent)
}

#[test]
fn resumed_deal_does_not_pay_failed_step_twice() {
    let mut w = world();
    let (deal_id, step_id, deponent) = failed_disbursement(&mut w);
    let escrow = w.payments.escrow_account(step_id);

    w.deals.resume_after_payment_failure(deal_id).unwrap();
    let err = w
        .payments
        .disburse_step(&mut w.deals, &mut w.engine, deal_id, step_id, "pay-2")
        .unwrap_err();
    assert!(matches!(err, DealflowError::InvalidStateTransition { .. }));

    assert_eq!(amount_of(&*w.ledger, &deponent), dec(800_000));
    assert_eq!(amount_of(&*w.ledger, &escrow), dec(800_000));
    assert_eq!(w.engine.list_transfers(&deponent).len(), 1);

    // The original request still finds the failed Payment.
    let failed = w
        .payments
        .disburse_step(&mut w.deals, &mut w.engine, deal_id, step_id, "pay-1")
        .unwrap();
    assert_eq!(failed.status, PaymentStatus::Failed);
    let step = w.deals.get_step(deal_id, step_id).unwrap();
    assert_eq!(step.payment_id, Some(failed.id));
}

#[test]
fn redrafted_deal_retries_failed_payment_only() {
    let mut w = world();
    let (deal_id, step_id, deponent) = failed_disbursement(&mut w);
    let escrow = w.payments.escrow_account(step_id);
    let recipient = w.deals.list_recipients(step_id).unwrap().remove(0);
    let updated = w
        .deals
        .update_recipient_bank_details(recipient.id, w.spare_bank)
        .unwrap();

    w.deals.move_to_draft(deal_id).unwrap();
    assert!(matches!(
        w.deals.cancel_step(deal_id, step_id).unwrap_err(),
        DealflowError::InvalidStateTransition { .. }
    ));
    assert!(matches!(
        w.deals.delete_step(deal_id, step_id).unwrap_err(),
        DealflowError::InvalidStateTransition { .. }
    ));
    w.deals.accept_deal(deal_id).unwrap();

    let err = w
        .payments
        .disburse_step(&mut w.deals, &mut w.engine, deal_id, step_id, "pay-2")
        .unwrap_err();
    assert!(matches!(err, DealflowError::InvalidStateTransition { .. }));
    assert_eq!(amount_of(&*w.ledger, &deponent), dec(800_000));

    let failed = w
        .payments
        .disburse_step(&mut w.deals, &mut w.engine, deal_id, step_id, "pay-1")
        .unwrap();
    let done = w
        .payments
        .retry_payment(&mut w.deals, &mut w.engine, failed.id)
        .unwrap();
    assert_eq!(done.status, PaymentStatus::Completed);
    assert_eq!(amount_of(&*w.ledger, &deponent), dec(800_000));
    assert_eq!(amount_of(&*w.ledger, &escrow), Decimal::ZERO);
    assert_eq!(
        amount_of(&*w.ledger, &PaymentCoordinator::payout_account(&updated)),
        dec(800_000)
    );
    assert_eq!(
        w.deals.complete_deal(deal_id).unwrap().status,
        DealStatus::Completed
    );
}

#[test]
fn retry_of_cancelled_deal_changes_nothing() {
    let mut w = world();
    let (deal_id, step_id, _) = failed_disbursement(&mut w);
    let failed = w
        .payments
        .disburse_step(&mut w.deals, &mut w.engine, deal_id, step_id, "pay-1")
        .unwrap();
    w.deals.cancel_deal(deal_id).unwrap();

    let err = w
        .payments
        .retry_payment(&mut w.deals, &mut w.engine, failed.id)
        .unwrap_err();
    assert!(matches!(err, DealflowError::InvalidStateTransition { .. }));
    assert_eq!(
        w.deals.get_deal(deal_id).unwrap().status,
        DealStatus::Cancelled
    );
    let leg = w.engine.get_transfer(failed.legs[1].transfer_id).unwrap();
    assert_eq!(leg.status, TransferStatus::Failed);
    assert_eq!(
        amount_of(&*w.ledger, &w.payments.escrow_account(step_id)),
        dec(800_000)
    );
}

#[test]
fn completed_payment_cannot_be_retried() {
    let mut w = world();
    let (deal_id, step_id) = accepted_deal(&mut w);
    let payment = w
        .payments
        .disburse_step(&mut w.deals, &mut w.engine, deal_id, step_id, "pay-1")
        .unwrap();

    let err = w
        .payments
        .retry_payment(&mut w.deals, &mut w.engine, payment.id)
        .unwrap_err();
    assert!(matches!(err, DealflowError::InvalidStateTransition { .. }));

    let json = serde_json::to_value(w.payments.get_payment(payment.id).unwrap()).unwrap();
    assert_eq!(json["status"], "COMPLETED");
}
