//! Backend adapter trait: the uniform CRUD surface over a storage engine.
//!
//! Every engine (document store, relational table, flat file, memory)
//! implements [`BackendAdapter`]. The [`LedgerStore`](crate::LedgerStore)
//! only ever talks to `Box<dyn BackendAdapter>`, chosen at construction.
//!
//! Adapters never see concurrent calls: the serialization queue runs one
//! operation at a time, so an adapter may read-modify-write its engine
//! without locking beyond what the engine itself needs.

use async_trait::async_trait;
use ledger_core::{BackendKind, Patch, Record, StoreError};

/// Uniform persistence contract for ledger records.
///
/// Returned records are canonical: engine-private fields (internal ids,
/// revision markers) are stripped and backend-assigned timestamps applied.
/// All failures surface as [`StoreError::Backend`].
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Which engine this adapter drives.
    fn kind(&self) -> BackendKind;

    /// Load every record, in the engine's insertion order.
    async fn read(&self) -> Result<Vec<Record>, StoreError>;

    /// Persist a new record and return its canonical form.
    async fn insert(&self, record: Record) -> Result<Record, StoreError>;

    /// Apply `patch` to the stored record for `key` and return the result.
    ///
    /// The adapter assigns `updatedAt`.
    async fn update_by_key(&self, key: &str, patch: &Patch) -> Result<Record, StoreError>;

    /// Delete the record for `key`. Deleting an absent key succeeds.
    async fn delete_by_key(&self, key: &str) -> Result<(), StoreError>;

    /// Release engine resources. Called once when the store shuts down.
    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Lets a caller keep a handle on the adapter it hands to the store.
#[async_trait]
impl<A: BackendAdapter + ?Sized> BackendAdapter for std::sync::Arc<A> {
    fn kind(&self) -> BackendKind {
        (**self).kind()
    }

    async fn read(&self) -> Result<Vec<Record>, StoreError> {
        (**self).read().await
    }

    async fn insert(&self, record: Record) -> Result<Record, StoreError> {
        (**self).insert(record).await
    }

    async fn update_by_key(&self, key: &str, patch: &Patch) -> Result<Record, StoreError> {
        (**self).update_by_key(key, patch).await
    }

    async fn delete_by_key(&self, key: &str) -> Result<(), StoreError> {
        (**self).delete_by_key(key).await
    }

    async fn close(&self) -> Result<(), StoreError> {
        (**self).close().await
    }
}
