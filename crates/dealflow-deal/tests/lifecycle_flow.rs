//! Integration test: deal assembly, reconciliation, and completion.

use std::sync::Arc;

use dealflow_deal::DealLifecycle;
use dealflow_types::fixtures::{dec, directory_with, new_deal, new_step, recipient_input};
use dealflow_types::{
    BankDetailsId, BeneficiaryId, DealConfig, DealId, DealStatus, DealflowError, DeponentInput,
    ReasonCode, StepId, StepStatus,
};

struct World {
    deals: DealLifecycle,
    owner: BeneficiaryId,
    a: BeneficiaryId,
    b: (BeneficiaryId, BankDetailsId),
}

fn world() -> World {
    let (dir, parties) = directory_with(3);
    World {
        deals: DealLifecycle::in_memory(DealConfig::default(), Arc::new(dir)),
        owner: parties[0].0,
        a: parties[1].0,
        b: parties[2],
    }
}

/// Deal of 800000 RUB with one Step: A deposits 800000, B receives `payout`.
fn assemble(w: &mut World, payout: i64) -> (DealId, StepId) {
    let deal = w.deals.create_deal(new_deal(w.owner, 800_000), "deal-1").unwrap();
    let step = w.deals.create_step(deal.id, new_step(800_000)).unwrap();
    w.deals
        .upsert_deponent(
            step.id,
            DeponentInput {
                beneficiary_id: w.a,
                amount: dec(800_000),
            },
        )
        .unwrap();
    w.deals
        .create_recipient(step.id, recipient_input(w.b.0, w.b.1, payout), "rcp-1")
        .unwrap();
    (deal.id, step.id)
}

#[test]
fn balanced_deal_is_valid() {
    let mut w = world();
    let (deal_id, _) = assemble(&mut w, 800_000);

    let report = w.deals.is_deal_valid(deal_id);
    assert!(report.is_valid);
    assert!(report.reasons.is_empty());

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json, serde_json::json!({ "isValid": true, "reasons": [] }));
}

#[test]
fn underfunded_deal_reports_shortfall() {
    let mut w = world();
    let (deal_id, step_id) = assemble(&mut w, 900_000);

    let report = w.deals.is_deal_valid(deal_id);
    assert!(!report.is_valid);
    assert_eq!(report.codes(), vec![ReasonCode::InsufficientDeposits]);

    let json = serde_json::to_value(&report.reasons[0]).unwrap();
    assert_eq!(json["code"], "INSUFFICIENT_DEPOSITS");
    assert_eq!(json["details"]["totalDeposited"], "800000");
    assert_eq!(json["details"]["totalRequired"], "900000");
    assert_eq!(json["details"]["stepId"], step_id.0.to_string());

    // Accepting is gated on the same report.
    let err = w.deals.accept_deal(deal_id).unwrap_err();
    assert!(matches!(
        err,
        DealflowError::IncompleteSettlement { ref reasons } if reasons.len() == 1
    ));
    assert_eq!(w.deals.get_deal(deal_id).unwrap().status, DealStatus::Draft);
}

#[test]
fn validation_is_read_only_and_repeatable() {
    let mut w = world();
    let (deal_id, _) = assemble(&mut w, 900_000);
    let before = w.deals.get_deal(deal_id).unwrap();
    let first = w.deals.is_deal_valid(deal_id);
    let second = w.deals.is_deal_valid(deal_id);
    assert_eq!(first, second);
    assert_eq!(w.deals.get_deal(deal_id).unwrap(), before);

    let missing = w.deals.is_deal_valid(DealId::new());
    assert_eq!(missing.codes(), vec![ReasonCode::DealNotFound]);
}

#[test]
fn full_lifecycle_to_completion() {
    let mut w = world();
    let (deal_id, step_id) = assemble(&mut w, 800_000);

    w.deals.accept_deal(deal_id).unwrap();
    let second = w.deals.create_step(deal_id, new_step(10)).unwrap();
    assert_eq!(second.sequence, 2);

    w.deals.start_step(deal_id, step_id).unwrap();
    w.deals.complete_step(deal_id, step_id).unwrap();

    // Step 2 is still NEW.
    let err = w.deals.complete_deal(deal_id).unwrap_err();
    assert_eq!(
        err,
        DealflowError::IncompleteSteps {
            deal_id,
            pending: 1
        }
    );

    w.deals.delete_step(deal_id, second.id).unwrap();
    let deal = w.deals.complete_deal(deal_id).unwrap();
    assert_eq!(deal.status, DealStatus::Completed);

    let err = w.deals.cancel_deal(deal_id).unwrap_err();
    assert!(matches!(err, DealflowError::InvalidStateTransition { .. }));
}

#[test]
fn cancelled_step_keeps_deal_from_completing() {
    let mut w = world();
    let (deal_id, step_id) = assemble(&mut w, 800_000);
    w.deals.accept_deal(deal_id).unwrap();
    let second = w.deals.create_step(deal_id, new_step(10)).unwrap();
    w.deals.start_step(deal_id, step_id).unwrap();
    w.deals.complete_step(deal_id, step_id).unwrap();
    w.deals.cancel_step(deal_id, second.id).unwrap();

    let err = w.deals.complete_deal(deal_id).unwrap_err();
    assert_eq!(
        err,
        DealflowError::IncompleteSteps {
            deal_id,
            pending: 1
        }
    );

    // The cancelled step also shows up in the settlement report.
    let report = w.deals.is_deal_valid(deal_id);
    assert_eq!(
        report.codes(),
        vec![ReasonCode::NoDeponentsInStep, ReasonCode::NoRecipientsInStep]
    );
}

#[test]
fn completed_steps_stay_covered() {
    let mut w = world();
    let (deal_id, step_id) = assemble(&mut w, 800_000);
    w.deals.accept_deal(deal_id).unwrap();
    w.deals.start_step(deal_id, step_id).unwrap();
    w.deals.complete_step(deal_id, step_id).unwrap();

    // Back to DRAFT: the completed step's members still cannot change.
    w.deals.move_to_draft(deal_id).unwrap();
    let deponents = w.deals.list_deponents(step_id).unwrap();
    let err = w.deals.delete_deponent(deponents[0].id).unwrap_err();
    assert!(matches!(err, DealflowError::InvalidStateTransition { .. }));

    let totals = w.deals.step_totals(deal_id, step_id).unwrap();
    assert!(totals.deposited >= totals.required);
    assert_eq!(
        w.deals.get_step(deal_id, step_id).unwrap().status,
        StepStatus::Completed
    );
}

#[test]
fn step_with_shortfall_cannot_complete() {
    let mut w = world();
    let (deal_id, step_id) = assemble(&mut w, 800_000);
    w.deals.accept_deal(deal_id).unwrap();
    w.deals.start_step(deal_id, step_id).unwrap();

    // Back in DRAFT, an ACTIVE step's members are editable again.
    w.deals.move_to_draft(deal_id).unwrap();
    let recipients = w.deals.list_recipients(step_id).unwrap();
    w.deals
        .update_recipient(
            recipients[0].id,
            dealflow_types::RecipientUpdate {
                amount: Some(dec(900_000)),
                ..Default::default()
            },
        )
        .unwrap();

    let err = w.deals.complete_step(deal_id, step_id).unwrap_err();
    match err {
        DealflowError::IncompleteSettlement { reasons } => {
            assert_eq!(reasons[0].code, ReasonCode::InsufficientDeposits);
        }
        other => panic!("unexpected {other:?}"),
    }
}
