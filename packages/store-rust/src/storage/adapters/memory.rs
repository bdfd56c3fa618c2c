//! Process-local [`BackendAdapter`] implementation.
//!
//! [`MemoryAdapter`] keeps records in a `Vec` and persists nothing. Useful for
//! tests, benchmarks, and ephemeral ledgers. It counts inserts and can be told
//! to fail its next write, which makes it the test double for store-level
//! consistency checks.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use ledger_core::{now_millis, BackendKind, Patch, Record, StoreError};
use parking_lot::Mutex;

use crate::storage::adapter::BackendAdapter;

/// In-memory backend for testing and ephemeral data.
#[derive(Default)]
pub struct MemoryAdapter {
    records: Mutex<Vec<Record>>,
    inserts: AtomicUsize,
    fail_next_write: AtomicBool,
}

impl MemoryAdapter {
    /// Creates an empty adapter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an adapter pre-populated with `records`.
    #[must_use]
    pub fn with_records(records: Vec<Record>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Self::default()
        }
    }

    /// Number of successful `insert` calls so far.
    #[must_use]
    pub fn insert_count(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    /// Makes the next mutating call fail with a backend error.
    pub fn fail_next_write(&self) {
        self.fail_next_write.store(true, Ordering::SeqCst);
    }

    /// Copy of the stored records.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Record> {
        self.records.lock().clone()
    }

    fn check_injected_failure(&self) -> Result<(), StoreError> {
        if self.fail_next_write.swap(false, Ordering::SeqCst) {
            return Err(StoreError::backend(BackendKind::Memory, "injected write failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl BackendAdapter for MemoryAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn read(&self) -> Result<Vec<Record>, StoreError> {
        Ok(self.snapshot())
    }

    async fn insert(&self, record: Record) -> Result<Record, StoreError> {
        self.check_injected_failure()?;
        let mut records = self.records.lock();
        if records.iter().any(|r| r.key == record.key) {
            return Err(StoreError::backend(
                BackendKind::Memory,
                format!("duplicate key {:?}", record.key),
            ));
        }
        let now = now_millis();
        let record = Record {
            created_at: now,
            updated_at: now,
            ..record
        };
        records.push(record.clone());
        self.inserts.fetch_add(1, Ordering::SeqCst);
        Ok(record)
    }

    async fn update_by_key(&self, key: &str, patch: &Patch) -> Result<Record, StoreError> {
        self.check_injected_failure()?;
        let mut records = self.records.lock();
        let slot = records
            .iter_mut()
            .find(|r| r.key == key)
            .ok_or_else(|| StoreError::backend(BackendKind::Memory, format!("no record {key:?}")))?;
        let mut updated = patch.apply_to(slot)?;
        updated.updated_at = now_millis().max(updated.updated_at + 1);
        *slot = updated.clone();
        Ok(updated)
    }

    async fn delete_by_key(&self, key: &str) -> Result<(), StoreError> {
        self.check_injected_failure()?;
        self.records.lock().retain(|r| r.key != key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ledger_core::{NewRecord, RecordStatus, UpdateSpec};
    use serde_json::json;

    use super::*;

    fn record(key: &str) -> Record {
        NewRecord::new(key)
            .secondary_key("g1")
            .amount(10)
            .link_id("L1")
            .into_record(1)
            .unwrap()
    }

    #[tokio::test]
    async fn insert_read_delete() {
        let adapter = MemoryAdapter::new();
        adapter.insert(record("a")).await.unwrap();
        adapter.insert(record("b")).await.unwrap();
        assert_eq!(adapter.insert_count(), 2);

        let keys: Vec<String> = adapter.read().await.unwrap().into_iter().map(|r| r.key).collect();
        assert_eq!(keys, vec!["a", "b"]);

        adapter.delete_by_key("a").await.unwrap();
        adapter.delete_by_key("missing").await.unwrap();
        assert_eq!(adapter.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_insert_fails() {
        let adapter = MemoryAdapter::new();
        adapter.insert(record("a")).await.unwrap();
        let err = adapter.insert(record("a")).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend { engine: BackendKind::Memory, .. }));
        assert_eq!(adapter.insert_count(), 1);
    }

    #[tokio::test]
    async fn update_applies_patch_and_stamps() {
        let adapter = MemoryAdapter::with_records(vec![record("a")]);
        let current = record("a");
        let patch = UpdateSpec::from_parts(json!({"status": "PAID"}), None)
            .unwrap()
            .compute_patch(&current.to_document())
            .unwrap();
        let updated = adapter.update_by_key("a", &patch).await.unwrap();
        assert_eq!(updated.status, RecordStatus::Paid);
        assert!(updated.updated_at > current.updated_at);
        assert_eq!(adapter.snapshot()[0], updated);
    }

    #[tokio::test]
    async fn injected_failure_hits_one_write() {
        let adapter = MemoryAdapter::new();
        adapter.fail_next_write();
        assert!(adapter.insert(record("a")).await.is_err());
        assert!(adapter.insert(record("a")).await.is_ok());
        assert_eq!(adapter.insert_count(), 1);
    }

    #[tokio::test]
    async fn updated_at_never_stalls_or_regresses() {
        let mut ahead = record("a");
        ahead.updated_at = now_millis() + 60_000;
        let adapter = MemoryAdapter::with_records(vec![ahead.clone()]);

        let patch = UpdateSpec::from_parts(json!({"description": "x"}), None)
            .unwrap()
            .compute_patch(&ahead.to_document())
            .unwrap();
        let first = adapter.update_by_key("a", &patch).await.unwrap();
        let second = adapter.update_by_key("a", &patch).await.unwrap();
        assert_eq!(first.updated_at, ahead.updated_at + 1);
        assert_eq!(second.updated_at, ahead.updated_at + 2);
    }
}
