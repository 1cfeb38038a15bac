//! System-wide constants for the Dealflow settlement core.

/// Length of an ISO-4217 style currency code.
pub const CURRENCY_CODE_LEN: usize = 3;

/// Account name used for a beneficiary's primary balance.
pub const DEFAULT_ACCOUNT: &str = "main";

/// Account name used for the escrow balance held by a Step.
pub const ESCROW_ACCOUNT: &str = "escrow";

/// First sequence number assigned to a Step within a Deal.
pub const FIRST_STEP_SEQUENCE: u32 = 1;

/// Maximum number of Steps a single Deal may hold.
pub const DEFAULT_MAX_STEPS_PER_DEAL: usize = 64;

/// Idempotency cache size (number of caller keys to remember per component).
pub const DEFAULT_IDEMPOTENCY_CACHE_SIZE: usize = 100_000;

/// Maximum length of an idempotency key.
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

/// Maximum length of a Deal or Step title.
pub const MAX_TITLE_LEN: usize = 255;

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
