//! Configuration types for the settlement core components.

use serde::{Deserialize, Serialize};

use crate::{DealflowError, Result, constants};

/// Top-level configuration; one section per component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DealflowConfig {
    pub ledger: LedgerConfig,
    pub deals: DealConfig,
    pub transfers: TransferConfig,
}

impl DealflowConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    ///
    /// # Errors
    /// Returns `Configuration` if the document is malformed or fails
    /// [`DealflowConfig::validate`].
    pub fn from_json(raw: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(raw)
            .map_err(|e| DealflowError::Configuration(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values no component can run with.
    ///
    /// # Errors
    /// Returns `Configuration` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.ledger.default_account.trim().is_empty() {
            return Err(DealflowError::Configuration(
                "ledger.default_account must not be empty".into(),
            ));
        }
        if self.ledger.escrow_account == self.ledger.default_account {
            return Err(DealflowError::Configuration(
                "ledger.escrow_account must differ from ledger.default_account".into(),
            ));
        }
        if self.deals.max_steps_per_deal == 0 {
            return Err(DealflowError::Configuration(
                "deals.max_steps_per_deal must be > 0".into(),
            ));
        }
        if self.deals.idempotency_cache_size == 0 || self.transfers.idempotency_cache_size == 0 {
            return Err(DealflowError::Configuration(
                "idempotency_cache_size must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Ledger configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Account name of a beneficiary's primary balance.
    pub default_account: String,
    /// Account name of a Step's escrow balance.
    pub escrow_account: String,
    /// Expiry applied to holds created without one. `None` = never expire.
    pub default_hold_ttl_secs: Option<u64>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            default_account: constants::DEFAULT_ACCOUNT.to_string(),
            escrow_account: constants::ESCROW_ACCOUNT.to_string(),
            default_hold_ttl_secs: None,
        }
    }
}

/// Deal lifecycle configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DealConfig {
    pub max_steps_per_deal: usize,
    pub idempotency_cache_size: usize,
}

impl Default for DealConfig {
    fn default() -> Self {
        Self {
            max_steps_per_deal: constants::DEFAULT_MAX_STEPS_PER_DEAL,
            idempotency_cache_size: constants::DEFAULT_IDEMPOTENCY_CACHE_SIZE,
        }
    }
}

/// Transfer engine and payment coordinator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub idempotency_cache_size: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            idempotency_cache_size: constants::DEFAULT_IDEMPOTENCY_CACHE_SIZE,
        }
    }
}
