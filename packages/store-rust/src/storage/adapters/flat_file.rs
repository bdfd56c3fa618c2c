//! Flat-file [`BackendAdapter`]: one JSON array of records on disk.
//!
//! Every mutating call reads the snapshot, changes it, and rewrites the whole
//! file through a temporary sibling followed by a rename, so readers never
//! see a half-written array. Calls arrive one at a time from the
//! serialization queue, which makes the read-modify-write safe without an
//! append log or file locks.

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use ledger_core::{now_millis, BackendKind, Patch, Record, StoreError};
use uuid::Uuid;

use crate::storage::adapter::BackendAdapter;

/// JSON-array file backend.
#[derive(Debug)]
pub struct FlatFileAdapter {
    path: PathBuf,
}

fn backend_err(err: anyhow::Error) -> StoreError {
    StoreError::backend(BackendKind::FlatFile, err)
}

impl FlatFileAdapter {
    /// Opens the file at `path`, creating it as `[]` when absent.
    ///
    /// # Errors
    ///
    /// Returns a backend error when the directory or file cannot be created,
    /// or an existing file is not a JSON array of records.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let adapter = Self { path: path.into() };
        if tokio::fs::try_exists(&adapter.path)
            .await
            .with_context(|| format!("checking {}", adapter.path.display()))
            .map_err(backend_err)?
        {
            adapter.load().await?;
        } else {
            tracing::info!(path = %adapter.path.display(), "initializing empty ledger file");
            adapter.persist(&[]).await?;
        }
        Ok(adapter)
    }

    /// Location of the snapshot file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Vec<Record>, StoreError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))
            .map_err(backend_err)?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("decoding {}", self.path.display()))
            .map_err(backend_err)
    }

    async fn persist(&self, records: &[Record]) -> Result<(), StoreError> {
        self.write_atomically(records).await.map_err(backend_err)
    }

    async fn write_atomically(&self, records: &[Record]) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        let payload = serde_json::to_vec_pretty(records).context("encoding ledger snapshot")?;
        let temp_path = self
            .path
            .with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&temp_path, payload)
            .await
            .with_context(|| format!("writing {}", temp_path.display()))?;

        if let Err(err) = tokio::fs::rename(&temp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| format!("replacing {}", self.path.display()));
        }
        Ok(())
    }
}

#[async_trait]
impl BackendAdapter for FlatFileAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::FlatFile
    }

    async fn read(&self) -> Result<Vec<Record>, StoreError> {
        self.load().await
    }

    async fn insert(&self, record: Record) -> Result<Record, StoreError> {
        let mut records = self.load().await?;
        if records.iter().any(|r| r.key == record.key) {
            return Err(backend_err(anyhow::anyhow!("duplicate key {:?}", record.key)));
        }
        let now = now_millis();
        let record = Record {
            created_at: now,
            updated_at: now,
            ..record
        };
        records.push(record.clone());
        self.persist(&records).await?;
        Ok(record)
    }

    async fn update_by_key(&self, key: &str, patch: &Patch) -> Result<Record, StoreError> {
        let mut records = self.load().await?;
        let slot = records
            .iter_mut()
            .find(|r| r.key == key)
            .ok_or_else(|| backend_err(anyhow::anyhow!("no record {key:?}")))?;
        let mut updated = patch.apply_to(slot)?;
        updated.updated_at = now_millis().max(updated.updated_at + 1);
        *slot = updated.clone();
        self.persist(&records).await?;
        Ok(updated)
    }

    async fn delete_by_key(&self, key: &str) -> Result<(), StoreError> {
        let mut records = self.load().await?;
        let before = records.len();
        records.retain(|r| r.key != key);
        if records.len() == before {
            return Ok(());
        }
        self.persist(&records).await
    }
}
