//! In-memory mirror of every record held by the backend.
//!
//! [`Mirror`] is an insertion-ordered collection loaded once from
//! [`BackendAdapter::read`](super::BackendAdapter::read) and afterwards
//! changed only after the backend has accepted a mutation. The store shares
//! it as [`SharedMirror`]; the write lock is taken only inside queued tasks
//! and never held across an await.

use std::sync::Arc;

use ledger_core::Record;
use parking_lot::RwLock;

/// Mirror handle shared between the queue worker and `exists` lookups.
pub type SharedMirror = Arc<RwLock<Mirror>>;

/// Ordered cache of all records.
#[derive(Debug, Default, Clone)]
pub struct Mirror {
    records: Vec<Record>,
}

impl Mirror {
    /// Creates a mirror holding `records` in the given order.
    #[must_use]
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    /// Wraps the mirror for sharing.
    #[must_use]
    pub fn shared(self) -> SharedMirror {
        Arc::new(RwLock::new(self))
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Record> {
        self.records.iter().find(|r| r.key == key)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Appends a newly created record.
    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    /// Replaces the record with the same key in place, returning the old one.
    ///
    /// Returns `None` and leaves the mirror untouched if the key is absent.
    pub fn replace(&mut self, record: Record) -> Option<Record> {
        let slot = self.records.iter_mut().find(|r| r.key == record.key)?;
        Some(std::mem::replace(slot, record))
    }

    /// Removes the record for `key`, returning it.
    pub fn remove(&mut self, key: &str) -> Option<Record> {
        let index = self.records.iter().position(|r| r.key == key)?;
        Some(self.records.remove(index))
    }

    /// Records whose secondary key equals `secondary_key`, in mirror order.
    pub fn by_secondary_key<'a>(
        &'a self,
        secondary_key: &'a str,
    ) -> impl Iterator<Item = &'a Record> + 'a {
        self.records
            .iter()
            .filter(move |r| r.secondary_key == secondary_key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Copy of every record, in order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Record> {
        self.records.clone()
    }
}
