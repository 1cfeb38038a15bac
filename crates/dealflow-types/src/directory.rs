//! Beneficiary directory seam.
//!
//! Beneficiaries and their bank details are managed outside the settlement
//! core. The core only asks whether an identifier exists and whether a set of
//! bank details belongs to a beneficiary.

use std::collections::{HashMap, HashSet};

use crate::{BankDetailsId, BeneficiaryId};

/// Read-only view of the external beneficiary registry.
pub trait BeneficiaryDirectory: Send + Sync {
    fn has_beneficiary(&self, id: &BeneficiaryId) -> bool;

    /// Whether `bank_details` is registered to `beneficiary`.
    fn has_bank_details(&self, beneficiary: &BeneficiaryId, bank_details: &BankDetailsId) -> bool;
}

/// In-memory directory, populated by the embedding application or tests.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    beneficiaries: HashSet<BeneficiaryId>,
    bank_details: HashMap<BankDetailsId, BeneficiaryId>,
}

impl InMemoryDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh beneficiary and return its id.
    pub fn add_beneficiary(&mut self) -> BeneficiaryId {
        let id = BeneficiaryId::new();
        self.beneficiaries.insert(id);
        id
    }

    /// Register fresh bank details for `beneficiary` and return their id.
    pub fn add_bank_details(&mut self, beneficiary: BeneficiaryId) -> BankDetailsId {
        let id = BankDetailsId::new();
        self.bank_details.insert(id, beneficiary);
        id
    }
}

impl BeneficiaryDirectory for InMemoryDirectory {
    fn has_beneficiary(&self, id: &BeneficiaryId) -> bool {
        self.beneficiaries.contains(id)
    }

    fn has_bank_details(&self, beneficiary: &BeneficiaryId, bank_details: &BankDetailsId) -> bool {
        self.bank_details.get(bank_details) == Some(beneficiary)
    }
}
