//! Idempotency keys for mutating creation requests.
//!
//! A caller-supplied key is bound to a fingerprint of the request payload
//! and the id of the record it created. Replaying the same key with an
//! equivalent payload yields the original record; replaying it with a
//! different payload is a [`DealflowError::DuplicateRequest`].
//!
//! [`IdempotencyGuard`] is the in-memory store. It keeps a bounded LRU-style
//! cache so memory usage stays predictable in long-running processes.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{DealflowError, Result, constants};

/// What a key was first used for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    /// Hex SHA-256 of the canonical request payload.
    pub fingerprint: String,
    /// Id of the record created by the first request.
    pub resource_id: Uuid,
}

/// Deduplication collaborator keyed on caller-supplied tokens.
pub trait IdempotencyStore: Send {
    fn lookup(&self, key: &str) -> Option<IdempotencyRecord>;

    fn remember(&mut self, key: &str, record: IdempotencyRecord);

    /// Resolve a key against a payload fingerprint.
    ///
    /// Returns `Ok(Some(id))` for a legitimate replay and `Ok(None)` for a
    /// fresh key.
    ///
    /// # Errors
    /// Returns [`DealflowError::DuplicateRequest`] if the key was used with a
    /// different payload.
    fn check(&self, key: &str, fingerprint: &str) -> Result<Option<Uuid>> {
        match self.lookup(key) {
            Some(record) if record.fingerprint == fingerprint => Ok(Some(record.resource_id)),
            Some(_) => Err(DealflowError::DuplicateRequest {
                key: key.to_string(),
            }),
            None => Ok(None),
        }
    }
}

/// Validate a caller-supplied key.
///
/// # Errors
/// Returns `Validation` if the key is blank or too long.
pub fn validate_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(DealflowError::validation("idempotency key must not be empty"));
    }
    if key.len() > constants::MAX_IDEMPOTENCY_KEY_LEN {
        return Err(DealflowError::validation(format!(
            "idempotency key exceeds {} bytes",
            constants::MAX_IDEMPOTENCY_KEY_LEN
        )));
    }
    Ok(())
}

/// SHA-256 over the canonical JSON encoding of `payload`, hex encoded.
///
/// # Errors
/// Returns `Serialization` if the payload cannot be encoded.
pub fn fingerprint<T: Serialize>(payload: &T) -> Result<String> {
    let bytes = serde_json::to_vec(payload)?;
    let mut hasher = Sha256::new();
    hasher.update(b"dealflow:idempotency:v1:");
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Bounded in-memory [`IdempotencyStore`].
///
/// When the cache reaches `max_size`, the oldest key is evicted to make room.
/// The replay guarantee therefore covers only the `max_size` most recent
/// keys: replaying an evicted key is treated as a fresh request and creates
/// a new record. Size the cache (`idempotency_cache_size` in the config) for
/// the longest window in which callers may retry, or back the
/// [`IdempotencyStore`] with durable storage.
pub struct IdempotencyGuard {
    /// Key → first-use record.
    records: HashMap<String, IdempotencyRecord>,
    /// Insertion order for FIFO eviction (front = oldest).
    order: VecDeque<String>,
    /// Maximum number of entries before eviction kicks in.
    max_size: usize,
}

impl IdempotencyGuard {
    /// Create a new guard with the given maximum cache size.
    ///
    /// # Panics
    /// Panics if `max_size` is zero.
    pub fn new(max_size: usize) -> Self {
        assert!(max_size > 0, "IdempotencyGuard max_size must be > 0");
        Self {
            records: HashMap::new(),
            order: VecDeque::new(),
            max_size,
        }
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the guard is empty (no keys tracked).
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for IdempotencyGuard {
    fn default() -> Self {
        Self::new(constants::DEFAULT_IDEMPOTENCY_CACHE_SIZE)
    }
}

impl IdempotencyStore for IdempotencyGuard {
    fn lookup(&self, key: &str) -> Option<IdempotencyRecord> {
        self.records.get(key).cloned()
    }

    fn remember(&mut self, key: &str, record: IdempotencyRecord) {
        if self.records.insert(key.to_string(), record).is_some() {
            return;
        }

        // Evict oldest if over capacity.
        if self.records.len() > self.max_size {
            if let Some(oldest) = self.order.pop_front() {
                self.records.remove(&oldest);
            }
        }
        self.order.push_back(key.to_string());
    }
}
