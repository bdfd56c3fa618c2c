//! Ledger observer trait and composite implementation.
//!
//! Defines [`LedgerObserver`] for reacting to committed record mutations and
//! [`CompositeObserver`], which fans notifications out to several observers.
//! Observers run inside the queued task that committed the change, so they
//! see mutations in exactly the order the store applied them.

use std::sync::Arc;

use ledger_core::Record;

/// Observer for committed ledger mutations.
///
/// Implementations can keep statistics, maintain side indexes, or forward
/// change events. They must not block: the serialization queue waits for
/// them.
///
/// Used as `Arc<dyn LedgerObserver>`.
pub trait LedgerObserver: Send + Sync {
    /// Called after the mirror is loaded from the backend.
    fn on_load(&self, _count: usize) {}

    /// Called after a new record is inserted.
    fn on_create(&self, record: &Record);

    /// Called after an existing record is updated.
    fn on_update(&self, old: &Record, new: &Record);

    /// Called after a record is removed.
    fn on_remove(&self, record: &Record);
}

/// Composite observer that fans out to multiple observers.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn LedgerObserver>>,
}

impl CompositeObserver {
    /// Creates a composite observer with the given list of observers.
    #[must_use]
    pub fn new(observers: Vec<Arc<dyn LedgerObserver>>) -> Self {
        Self { observers }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl LedgerObserver for CompositeObserver {
    fn on_load(&self, count: usize) {
        for observer in &self.observers {
            observer.on_load(count);
        }
    }

    fn on_create(&self, record: &Record) {
        for observer in &self.observers {
            observer.on_create(record);
        }
    }

    fn on_update(&self, old: &Record, new: &Record) {
        for observer in &self.observers {
            observer.on_update(old, new);
        }
    }

    fn on_remove(&self, record: &Record) {
        for observer in &self.observers {
            observer.on_remove(record);
        }
    }
}
