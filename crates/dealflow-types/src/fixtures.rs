//! Test fixtures shared by the workspace's test suites. **Never use in production.**

use rust_decimal::Decimal;

use crate::{
    BankDetailsId, BeneficiaryId, Currency, InMemoryDirectory, NewDeal, NewStep, RecipientInput,
};

/// Whole-unit decimal.
#[must_use]
pub fn dec(n: i64) -> Decimal {
    Decimal::new(n, 0)
}

#[must_use]
pub fn rub() -> Currency {
    Currency::parse("RUB").expect("RUB is a valid code")
}

/// A DRAFT deal request for `amount` RUB owned by `owner`.
#[must_use]
pub fn new_deal(owner: BeneficiaryId, amount: i64) -> NewDeal {
    NewDeal {
        title: "Apartment purchase".into(),
        amount: dec(amount),
        currency: "RUB".into(),
        beneficiary_id: owner,
    }
}

#[must_use]
pub fn new_step(amount: i64) -> NewStep {
    NewStep {
        title: "Main payment".into(),
        amount: dec(amount),
        currency: "RUB".into(),
    }
}

#[must_use]
pub fn recipient_input(
    beneficiary_id: BeneficiaryId,
    bank_details_id: BankDetailsId,
    amount: i64,
) -> RecipientInput {
    RecipientInput {
        beneficiary_id,
        bank_details_id,
        amount: dec(amount),
        tax: Decimal::ZERO,
        purpose: "Payment under contract".into(),
    }
}

/// A directory pre-populated with `n` beneficiaries, each with one set of
/// bank details.
#[must_use]
pub fn directory_with(n: usize) -> (InMemoryDirectory, Vec<(BeneficiaryId, BankDetailsId)>) {
    let mut dir = InMemoryDirectory::new();
    let parties = (0..n)
        .map(|_| {
            let ben = dir.add_beneficiary();
            let bank = dir.add_bank_details(ben);
            (ben, bank)
        })
        .collect();
    (dir, parties)
}
