//! Currency codes and amount checks.
//!
//! Every monetary record carries exactly one [`Currency`]. Amounts are
//! `rust_decimal::Decimal`; the helpers here centralise the "strictly
//! positive" and "non-negative" rules so all components reject the same
//! inputs with the same error.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{DealflowError, Result, constants};

/// A three-letter alphabetic currency code, stored upper-case (e.g. "RUB").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    /// Parse and normalise a currency code.
    ///
    /// # Errors
    /// Returns [`DealflowError::Validation`] unless `code` is exactly three
    /// ASCII letters.
    pub fn parse(code: &str) -> Result<Self> {
        let code = code.trim();
        if code.len() != constants::CURRENCY_CODE_LEN
            || !code.chars().all(|c| c.is_ascii_alphabetic())
        {
            return Err(DealflowError::validation(format!(
                "currency must be a {}-letter code, got {code:?}",
                constants::CURRENCY_CODE_LEN
            )));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Currency {
    type Error = DealflowError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reject zero and negative amounts.
///
/// # Errors
/// Returns [`DealflowError::Validation`] naming `what` when `amount <= 0`.
pub fn ensure_positive(amount: Decimal, what: &str) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(DealflowError::validation(format!(
            "{what} must be greater than zero, got {amount}"
        )));
    }
    Ok(())
}

/// Reject negative amounts.
///
/// # Errors
/// Returns [`DealflowError::Validation`] naming `what` when `amount < 0`.
pub fn ensure_non_negative(amount: Decimal, what: &str) -> Result<()> {
    if amount < Decimal::ZERO {
        return Err(DealflowError::validation(format!(
            "{what} must not be negative, got {amount}"
        )));
    }
    Ok(())
}

/// Reject a currency that differs from the one a record is denominated in.
///
/// # Errors
/// Returns [`DealflowError::Validation`] on mismatch.
pub fn ensure_same_currency(expected: &Currency, actual: &Currency, what: &str) -> Result<()> {
    if expected != actual {
        return Err(DealflowError::validation(format!(
            "{what} is denominated in {expected}, got {actual}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_uppercases() {
        let c = Currency::parse("rub").unwrap();
        assert_eq!(c.as_str(), "RUB");
        assert_eq!(c.to_string(), "RUB");
    }

    #[test]
    fn rejects_wrong_length_and_digits() {
        for bad in ["", "RU", "RUBL", "R1B", "€€€"] {
            let err = Currency::parse(bad).unwrap_err();
            assert!(
                matches!(err, DealflowError::Validation { .. }),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn serde_validates_on_deserialize() {
        let c: Currency = serde_json::from_str("\"usd\"").unwrap();
        assert_eq!(c.as_str(), "USD");
        assert!(serde_json::from_str::<Currency>("\"US\"").is_err());
        assert_eq!(serde_json::to_string(&c).unwrap(), "\"USD\"");
    }

    #[test]
    fn positive_amount_rule() {
        assert!(ensure_positive(Decimal::ONE, "amount").is_ok());
        assert!(ensure_positive(Decimal::ZERO, "amount").is_err());
        assert!(ensure_positive(Decimal::NEGATIVE_ONE, "amount").is_err());
    }

    #[test]
    fn non_negative_amount_rule() {
        assert!(ensure_non_negative(Decimal::ZERO, "tax").is_ok());
        assert!(ensure_non_negative(Decimal::new(-1, 2), "tax").is_err());
    }

    #[test]
    fn currency_mismatch_rejected() {
        let rub = Currency::parse("RUB").unwrap();
        let usd = Currency::parse("USD").unwrap();
        assert!(ensure_same_currency(&rub, &rub, "balance").is_ok());
        let err = ensure_same_currency(&rub, &usd, "balance").unwrap_err();
        assert!(format!("{err}").contains("RUB"));
    }
}
