//! Generic storage capability.
//!
//! Components receive one [`Repository`] per entity type instead of
//! reaching into a shared store. [`InMemoryRepository`] is the default
//! implementation; a persistence layer can supply its own.

use std::{collections::HashMap, fmt, hash::Hash};

use crate::{
    Deal, DealId, DealflowError, Deponent, DeponentId, Payment, PaymentId, Recipient, RecipientId,
    Result, Step, StepId, Transfer, TransferId,
};

/// A record addressable by id.
pub trait Entity: Clone + Send + 'static {
    type Id: Copy + Eq + Hash + Ord + fmt::Display + Send + 'static;

    /// Lower-case entity name used in `NotFound` errors.
    const KIND: &'static str;

    fn id(&self) -> Self::Id;
}

/// CRUD storage for one entity type.
pub trait Repository<T: Entity>: Send {
    fn get(&self, id: &T::Id) -> Option<T>;

    /// # Errors
    /// Returns `Validation` if a record with the same id already exists.
    fn create(&mut self, entity: T) -> Result<()>;

    /// # Errors
    /// Returns `NotFound` if no record with this id exists.
    fn update(&mut self, entity: T) -> Result<()>;

    /// # Errors
    /// Returns `NotFound` if no record with this id exists.
    fn delete(&mut self, id: &T::Id) -> Result<T>;

    /// All records, ordered by id.
    fn list(&self) -> Vec<T>;

    /// Fetch or fail with `NotFound`.
    fn require(&self, id: &T::Id) -> Result<T> {
        self.get(id)
            .ok_or_else(|| DealflowError::not_found(T::KIND, id))
    }
}

/// `HashMap`-backed repository.
pub struct InMemoryRepository<T: Entity> {
    records: HashMap<T::Id, T>,
}

impl<T: Entity> InMemoryRepository<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<T: Entity> Default for InMemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> Repository<T> for InMemoryRepository<T> {
    fn get(&self, id: &T::Id) -> Option<T> {
        self.records.get(id).cloned()
    }

    fn create(&mut self, entity: T) -> Result<()> {
        let id = entity.id();
        if self.records.contains_key(&id) {
            return Err(DealflowError::validation(format!(
                "{} {id} already exists",
                T::KIND
            )));
        }
        self.records.insert(id, entity);
        Ok(())
    }

    fn update(&mut self, entity: T) -> Result<()> {
        let id = entity.id();
        let slot = self
            .records
            .get_mut(&id)
            .ok_or_else(|| DealflowError::not_found(T::KIND, id))?;
        *slot = entity;
        Ok(())
    }

    fn delete(&mut self, id: &T::Id) -> Result<T> {
        self.records
            .remove(id)
            .ok_or_else(|| DealflowError::not_found(T::KIND, id))
    }

    fn list(&self) -> Vec<T> {
        let mut all: Vec<T> = self.records.values().cloned().collect();
        all.sort_by_key(|e| e.id());
        all
    }
}

// ---------------------------------------------------------------------------
// Entity impls
// ---------------------------------------------------------------------------

impl Entity for Deal {
    type Id = DealId;
    const KIND: &'static str = "deal";
    fn id(&self) -> DealId {
        self.id
    }
}

impl Entity for Step {
    type Id = StepId;
    const KIND: &'static str = "step";
    fn id(&self) -> StepId {
        self.id
    }
}

impl Entity for Deponent {
    type Id = DeponentId;
    const KIND: &'static str = "deponent";
    fn id(&self) -> DeponentId {
        self.id
    }
}

impl Entity for Recipient {
    type Id = RecipientId;
    const KIND: &'static str = "recipient";
    fn id(&self) -> RecipientId {
        self.id
    }
}

impl Entity for Transfer {
    type Id = TransferId;
    const KIND: &'static str = "transfer";
    fn id(&self) -> TransferId {
        self.id
    }
}

impl Entity for Payment {
    type Id = PaymentId;
    const KIND: &'static str = "payment";
    fn id(&self) -> PaymentId {
        self.id
    }
}
