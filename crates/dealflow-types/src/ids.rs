//! Globally unique identifiers used throughout Dealflow.
//!
//! Entity IDs minted by the settlement core use UUIDv7 for time-ordered
//! lexicographic sorting. `BeneficiaryId` and `BankDetailsId` are issued by
//! the external beneficiary directory and only wrapped here.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declares a `Uuid` newtype with UUIDv7 construction and a prefixed `Display`.
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            #[must_use]
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            #[must_use]
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }
    };
}

uuid_id!(
    /// Identifier of an escrow Deal.
    DealId,
    "deal"
);

uuid_id!(
    /// Identifier of a Step within a Deal.
    StepId,
    "step"
);

uuid_id!(
    /// Identifier of a Deponent record.
    DeponentId,
    "dep"
);

uuid_id!(
    /// Identifier of a Recipient record.
    RecipientId,
    "rcp"
);

uuid_id!(
    /// Identifier of a Transfer.
    TransferId,
    "tr"
);

uuid_id!(
    /// Identifier of a Hold (funds reservation) on a Balance.
    HoldId,
    "hold"
);

uuid_id!(
    /// Identifier of a Payment (one Step's disbursement).
    PaymentId,
    "pay"
);

uuid_id!(
    /// Beneficiary identifier issued by the beneficiary directory.
    BeneficiaryId,
    "ben"
);

uuid_id!(
    /// Bank details identifier issued by the beneficiary directory.
    BankDetailsId,
    "bank"
);

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
