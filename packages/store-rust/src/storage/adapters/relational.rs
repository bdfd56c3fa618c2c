//! Relational [`BackendAdapter`] over a single SQLite table via `sqlx`.
//!
//! One row per record in `ledger_records`, keyed by `key`. `status` is a
//! CHECK-constrained column, `raw` a JSON text column, and both timestamps
//! are produced by the database (column defaults on insert, an update
//! expression on update) and read back with `RETURNING`.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use ledger_core::{BackendKind, Patch, Record, RecordStatus, StoreError};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use crate::storage::adapter::BackendAdapter;

const CREATE_TABLE: &str = "
CREATE TABLE IF NOT EXISTS ledger_records (
    key           TEXT PRIMARY KEY NOT NULL,
    secondary_key TEXT NOT NULL,
    amount        INTEGER NOT NULL CHECK (amount >= 0),
    status        TEXT NOT NULL CHECK (status IN ('PENDING', 'PAID', 'FAILED', 'REFUNDED')),
    link_id       TEXT NOT NULL,
    completed_at  INTEGER,
    description   TEXT,
    raw           TEXT,
    created_at    INTEGER NOT NULL
        DEFAULT (CAST(ROUND((julianday('now') - 2440587.5) * 86400000) AS INTEGER)),
    updated_at    INTEGER NOT NULL
        DEFAULT (CAST(ROUND((julianday('now') - 2440587.5) * 86400000) AS INTEGER))
)";

const CREATE_SECONDARY_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_ledger_secondary_key ON ledger_records (secondary_key)";

const SELECT_ALL: &str = "SELECT key, secondary_key, amount, status, link_id, completed_at, \
                          description, raw, created_at, updated_at \
                          FROM ledger_records ORDER BY created_at, rowid";

const SELECT_ONE: &str = "SELECT key, secondary_key, amount, status, link_id, completed_at, \
                          description, raw, created_at, updated_at \
                          FROM ledger_records WHERE key = ?";

const INSERT: &str = "INSERT INTO ledger_records \
                      (key, secondary_key, amount, status, link_id, completed_at, description, raw) \
                      VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
                      RETURNING key, secondary_key, amount, status, link_id, completed_at, \
                      description, raw, created_at, updated_at";

const UPDATE: &str = "UPDATE ledger_records SET \
                      secondary_key = ?, amount = ?, status = ?, link_id = ?, completed_at = ?, \
                      description = ?, raw = ?, \
                      updated_at = MAX(updated_at + 1, \
                          CAST(ROUND((julianday('now') - 2440587.5) * 86400000) AS INTEGER)) \
                      WHERE key = ? \
                      RETURNING key, secondary_key, amount, status, link_id, completed_at, \
                      description, raw, created_at, updated_at";

const DELETE: &str = "DELETE FROM ledger_records WHERE key = ?";

fn backend_err(err: impl std::fmt::Display) -> StoreError {
    StoreError::backend(BackendKind::Relational, err)
}

/// Column encodings that differ from the record field types.
struct RowValues {
    amount: i64,
    raw: Option<String>,
}

impl RowValues {
    fn of(record: &Record) -> anyhow::Result<Self> {
        Ok(Self {
            amount: i64::try_from(record.amount).context("amount exceeds column range")?,
            raw: record
                .raw
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .context("encoding raw payload")?,
        })
    }
}

fn record_from_row(row: &SqliteRow) -> anyhow::Result<Record> {
    let amount: i64 = row.try_get("amount")?;
    let status: String = row.try_get("status")?;
    let raw: Option<String> = row.try_get("raw")?;
    Ok(Record {
        key: row.try_get("key")?,
        secondary_key: row.try_get("secondary_key")?,
        amount: u64::try_from(amount).context("negative amount in row")?,
        status: status.parse::<RecordStatus>()?,
        link_id: row.try_get("link_id")?,
        completed_at: row.try_get("completed_at")?,
        description: row.try_get("description")?,
        raw: raw
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .context("decoding raw column")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// SQLite-backed relational table.
pub struct RelationalAdapter {
    pool: SqlitePool,
}

impl RelationalAdapter {
    /// Connects to `url` (e.g. `sqlite://ledger.db?mode=rwc` or
    /// `sqlite::memory:`) and creates the table if needed.
    ///
    /// The pool holds a single long-lived connection: writes are serialized
    /// upstream anyway, and an in-memory database lives only as long as its
    /// connection.
    ///
    /// # Errors
    ///
    /// Returns a backend error when the connection or schema setup fails.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect(url)
            .await
            .map_err(backend_err)?;
        Self::with_pool(pool).await
    }

    /// Wraps an existing pool, creating the table if needed.
    ///
    /// # Errors
    ///
    /// Returns a backend error when schema setup fails.
    pub async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(CREATE_TABLE)
            .execute(&pool)
            .await
            .map_err(backend_err)?;
        sqlx::query(CREATE_SECONDARY_INDEX)
            .execute(&pool)
            .await
            .map_err(backend_err)?;
        tracing::debug!("ledger_records table ready");
        Ok(Self { pool })
    }

    async fn update_inner(&self, key: &str, patch: &Patch) -> anyhow::Result<Record> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(SELECT_ONE)
            .bind(key)
            .fetch_optional(&mut *tx)
            .await?
            .with_context(|| format!("no row for {key:?}"))?;
        let current = record_from_row(&row)?;
        let next = patch.apply_to(&current)?;
        let values = RowValues::of(&next)?;

        let row = sqlx::query(UPDATE)
            .bind(&next.secondary_key)
            .bind(values.amount)
            .bind(next.status.as_str())
            .bind(&next.link_id)
            .bind(next.completed_at)
            .bind(&next.description)
            .bind(&values.raw)
            .bind(key)
            .fetch_one(&mut *tx)
            .await?;
        let updated = record_from_row(&row)?;

        tx.commit().await?;
        Ok(updated)
    }
}

#[async_trait]
impl BackendAdapter for RelationalAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Relational
    }

    async fn read(&self) -> Result<Vec<Record>, StoreError> {
        let rows = sqlx::query(SELECT_ALL)
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;
        rows.iter()
            .map(record_from_row)
            .collect::<anyhow::Result<Vec<_>>>()
            .map_err(backend_err)
    }

    async fn insert(&self, record: Record) -> Result<Record, StoreError> {
        let values = RowValues::of(&record).map_err(backend_err)?;
        let row = sqlx::query(INSERT)
            .bind(&record.key)
            .bind(&record.secondary_key)
            .bind(values.amount)
            .bind(record.status.as_str())
            .bind(&record.link_id)
            .bind(record.completed_at)
            .bind(&record.description)
            .bind(&values.raw)
            .fetch_one(&self.pool)
            .await
            .map_err(backend_err)?;
        record_from_row(&row).map_err(backend_err)
    }

    async fn update_by_key(&self, key: &str, patch: &Patch) -> Result<Record, StoreError> {
        self.update_inner(key, patch).await.map_err(backend_err)
    }

    async fn delete_by_key(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query(DELETE)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.pool.close().await;
        Ok(())
    }
}
