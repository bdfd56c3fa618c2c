//! Document-store [`BackendAdapter`] backed by an embedded `redb` database.
//!
//! Each record is one MsgPack document in the `ledger_records` table, keyed by
//! record key. Documents carry three engine-private fields: `_id` (assigned on
//! insert), `_rev` (incremented on every update) and `_seq` (insertion
//! sequence, drawn from a counter in `ledger_meta`). All are stripped before
//! a record leaves the adapter; `_seq` restores insertion order on read.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use ledger_core::{now_millis, BackendKind, Patch, Record, StoreError};
use redb::{Database, ReadableTable, TableDefinition};
use serde_json::Value;
use uuid::Uuid;

use crate::storage::adapter::BackendAdapter;

const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("ledger_records");
const META: TableDefinition<&str, u64> = TableDefinition::new("ledger_meta");

const NEXT_SEQ: &str = "next_seq";

const ID_FIELD: &str = "_id";
const REV_FIELD: &str = "_rev";
const SEQ_FIELD: &str = "_seq";

/// A decoded document: the canonical record plus its private metadata.
#[derive(Debug)]
struct Document {
    id: String,
    rev: u64,
    seq: u64,
    record: Record,
}

impl Document {
    fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let mut value = self.record.to_document();
        let fields = value
            .as_object_mut()
            .context("record did not serialize to an object")?;
        fields.insert(ID_FIELD.to_string(), Value::from(self.id.clone()));
        fields.insert(REV_FIELD.to_string(), Value::from(self.rev));
        fields.insert(SEQ_FIELD.to_string(), Value::from(self.seq));
        rmp_serde::to_vec_named(&value).context("encoding document")
    }

    fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        let mut value: Value = rmp_serde::from_slice(bytes).context("decoding document")?;
        let fields = value
            .as_object_mut()
            .context("stored document is not a map")?;
        let id = fields
            .remove(ID_FIELD)
            .and_then(|v| v.as_str().map(str::to_owned))
            .context("document has no _id")?;
        let rev = fields
            .remove(REV_FIELD)
            .and_then(|v| v.as_u64())
            .context("document has no _rev")?;
        let seq = fields
            .remove(SEQ_FIELD)
            .and_then(|v| v.as_u64())
            .context("document has no _seq")?;
        let record = Record::from_document(value).context("document does not hold a record")?;
        Ok(Self {
            id,
            rev,
            seq,
            record,
        })
    }
}

/// Embedded document store.
pub struct DocumentAdapter {
    db: Arc<Database>,
}

fn backend_err(err: impl std::fmt::Display) -> StoreError {
    StoreError::backend(BackendKind::Document, err)
}

impl DocumentAdapter {
    /// Opens (or creates) the database file at `path`.
    ///
    /// # Errors
    ///
    /// Returns a backend error when the file cannot be opened or the records
    /// table cannot be created.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::open_inner(path).map_err(backend_err)
    }

    fn open_inner(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let db = Database::create(path).with_context(|| format!("opening {}", path.display()))?;

        let txn = db.begin_write()?;
        txn.open_table(RECORDS)?;
        txn.open_table(META)?;
        txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Runs a blocking database operation off the async runtime.
    async fn blocking<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(backend_err)?
            .map_err(backend_err)
    }
}

#[async_trait]
impl BackendAdapter for DocumentAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Document
    }

    async fn read(&self) -> Result<Vec<Record>, StoreError> {
        self.blocking(|db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(RECORDS)?;
            let mut documents = Vec::new();
            for entry in table.iter()? {
                let (_key, bytes) = entry?;
                documents.push(Document::decode(bytes.value())?);
            }
            // Keys iterate in byte order; restore insertion order.
            documents.sort_by_key(|d| d.seq);
            Ok(documents.into_iter().map(|d| d.record).collect())
        })
        .await
    }

    async fn insert(&self, record: Record) -> Result<Record, StoreError> {
        self.blocking(move |db| {
            let txn = db.begin_write()?;
            let stored = {
                let mut table = txn.open_table(RECORDS)?;
                if table.get(record.key.as_str())?.is_some() {
                    anyhow::bail!("duplicate key {:?}", record.key);
                }

                let mut meta = txn.open_table(META)?;
                let seq = meta.get(NEXT_SEQ)?.map_or(0, |guard| guard.value());
                meta.insert(NEXT_SEQ, seq + 1)?;

                let now = now_millis();
                let document = Document {
                    id: Uuid::new_v4().to_string(),
                    rev: 1,
                    seq,
                    record: Record {
                        created_at: now,
                        updated_at: now,
                        ..record
                    },
                };
                table.insert(document.record.key.as_str(), document.encode()?.as_slice())?;
                document.record
            };
            txn.commit()?;
            Ok(stored)
        })
        .await
    }

    async fn update_by_key(&self, key: &str, patch: &Patch) -> Result<Record, StoreError> {
        let key = key.to_string();
        let patch = patch.clone();
        self.blocking(move |db| {
            let txn = db.begin_write()?;
            let updated = {
                let mut table = txn.open_table(RECORDS)?;
                let existing = table
                    .get(key.as_str())?
                    .map(|guard| guard.value().to_vec())
                    .with_context(|| format!("no document for {key:?}"))?;
                let current = Document::decode(&existing)?;

                let mut record = patch.apply_to(&current.record)?;
                record.updated_at = now_millis().max(current.record.updated_at + 1);
                let next = Document {
                    id: current.id,
                    rev: current.rev + 1,
                    seq: current.seq,
                    record,
                };
                table.insert(key.as_str(), next.encode()?.as_slice())?;
                next.record
            };
            txn.commit()?;
            Ok(updated)
        })
        .await
    }

    async fn delete_by_key(&self, key: &str) -> Result<(), StoreError> {
        let key = key.to_string();
        self.blocking(move |db| {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(RECORDS)?;
                table.remove(key.as_str())?;
            }
            txn.commit()?;
            Ok(())
        })
        .await
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
            .raw(json!({"provider": {"ref": "abc"}}))
            .into_record(0)
            .unwrap()
    }

    fn raw_document(db: &Database, key: &str) -> Value {
        let txn = db.begin_read().unwrap();
        let table = txn.open_table(RECORDS).unwrap();
        let bytes = table.get(key).unwrap().unwrap().value().to_vec();
        rmp_serde::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn insert_stamps_and_strips_private_fields() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = DocumentAdapter::open(&dir.path().join("ledger.redb")).unwrap();

        let stored = adapter.insert(record("tx1")).await.unwrap();
        assert!(stored.created_at > 0);
        assert_eq!(stored.created_at, stored.updated_at);

        let doc = raw_document(&adapter.db, "tx1");
        assert!(doc.get("_id").is_some());
        assert_eq!(doc["_rev"], 1);
        assert_eq!(doc["_seq"], 0);

        let read = adapter.read().await.unwrap();
        assert_eq!(read, vec![stored]);
    }

    #[tokio::test]
    async fn update_bumps_revision() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = DocumentAdapter::open(&dir.path().join("ledger.redb")).unwrap();
        let stored = adapter.insert(record("tx1")).await.unwrap();

        let patch = UpdateSpec::from_parts(json!({"status": "REFUNDED"}), None)
            .unwrap()
            .compute_patch(&stored.to_document())
            .unwrap();
        let updated = adapter.update_by_key("tx1", &patch).await.unwrap();
        assert_eq!(updated.status, RecordStatus::Refunded);
        assert_eq!(updated.raw, stored.raw);

        let doc = raw_document(&adapter.db, "tx1");
        assert_eq!(doc["_rev"], 2);
    }

    #[tokio::test]
    async fn duplicate_insert_and_missing_update_fail() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = DocumentAdapter::open(&dir.path().join("ledger.redb")).unwrap();
        adapter.insert(record("tx1")).await.unwrap();

        assert!(matches!(
            adapter.insert(record("tx1")).await,
            Err(StoreError::Backend { engine: BackendKind::Document, .. })
        ));
        let patch = Patch::default();
        assert!(adapter.update_by_key("nope", &patch).await.is_err());
    }

    #[tokio::test]
    async fn delete_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.redb");
        {
            let adapter = DocumentAdapter::open(&path).unwrap();
            adapter.insert(record("a")).await.unwrap();
            adapter.insert(record("b")).await.unwrap();
            adapter.delete_by_key("a").await.unwrap();
            adapter.delete_by_key("never").await.unwrap();
        }
        let adapter = DocumentAdapter::open(&path).unwrap();
        let keys: Vec<String> = adapter.read().await.unwrap().into_iter().map(|r| r.key).collect();
        assert_eq!(keys, vec!["b"]);
    }

    #[tokio::test]
    async fn reopen_keeps_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.redb");
        {
            let adapter = DocumentAdapter::open(&path).unwrap();
            for key in ["zeta", "beta", "alpha"] {
                adapter.insert(record(key)).await.unwrap();
            }
            let patch = UpdateSpec::from_parts(json!({"description": "later"}), None)
                .unwrap()
                .compute_patch(&record("zeta").to_document())
                .unwrap();
            adapter.update_by_key("zeta", &patch).await.unwrap();
        }

        let adapter = DocumentAdapter::open(&path).unwrap();
        adapter.insert(record("aardvark")).await.unwrap();
        let keys: Vec<String> = adapter.read().await.unwrap().into_iter().map(|r| r.key).collect();
        assert_eq!(keys, vec!["zeta", "beta", "alpha", "aardvark"]);
    }

    #[tokio::test]
    async fn back_to_back_updates_advance_updated_at() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = DocumentAdapter::open(&dir.path().join("ledger.redb")).unwrap();
        let stored = adapter.insert(record("tx1")).await.unwrap();

        let mut last = stored.updated_at;
        for i in 0..3 {
            let patch = UpdateSpec::from_parts(json!({"amount": i}), None)
                .unwrap()
                .compute_patch(&stored.to_document())
                .unwrap();
            let updated = adapter.update_by_key("tx1", &patch).await.unwrap();
            assert!(updated.updated_at > last);
            last = updated.updated_at;
        }
    }
}
