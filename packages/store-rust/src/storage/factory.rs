//! Factory for fully-wired [`LedgerStore`] instances.
//!
//! [`StoreFactory`] is the dependency injection point: it turns a
//! [`StoreConfig`] into a concrete [`BackendAdapter`], then opens a
//! [`LedgerStore`] over it with the registered observers and projection.

use std::sync::Arc;

use ledger_core::{BackendKind, Projection, StoreError};

use crate::config::{BackendConfig, StoreConfig};
use crate::storage::adapter::BackendAdapter;
use crate::storage::adapters::{FlatFileAdapter, MemoryAdapter};
use crate::storage::observer::LedgerObserver;
use crate::store::{LedgerStore, StoreOptions};

/// Builds [`LedgerStore`]s from configuration.
pub struct StoreFactory {
    config: StoreConfig,
    observers: Vec<Arc<dyn LedgerObserver>>,
    projection: Option<Arc<dyn Projection>>,
}

impl StoreFactory {
    #[must_use]
    pub fn new(config: StoreConfig, observers: Vec<Arc<dyn LedgerObserver>>) -> Self {
        Self {
            config,
            observers,
            projection: None,
        }
    }

    /// Sets the capability used to answer `query` arguments.
    #[must_use]
    pub fn with_projection(mut self, projection: Arc<dyn Projection>) -> Self {
        self.projection = Some(projection);
        self
    }

    /// Opens the configured backend and starts a store over it.
    ///
    /// # Errors
    ///
    /// Returns a backend error when the engine cannot be opened or its
    /// initial read fails.
    pub async fn open(&self) -> Result<LedgerStore, StoreError> {
        let adapter = build_adapter(&self.config.backend).await?;
        LedgerStore::open(
            adapter,
            StoreOptions {
                queue_capacity: self.config.queue_capacity,
                observers: self.observers.clone(),
                projection: self.projection.clone(),
            },
        )
        .await
    }
}

/// Opens the adapter described by `config`.
///
/// # Errors
///
/// Returns a backend error when the engine cannot be opened, or when it was
/// compiled out.
pub async fn build_adapter(config: &BackendConfig) -> Result<Box<dyn BackendAdapter>, StoreError> {
    match config {
        BackendConfig::FlatFile { path } => Ok(Box::new(FlatFileAdapter::open(path.clone()).await?)),
        BackendConfig::Memory => Ok(Box::new(MemoryAdapter::new())),
        #[cfg(feature = "redb")]
        BackendConfig::Document { path } => {
            let path = path.clone();
            let adapter = tokio::task::spawn_blocking(move || {
                crate::storage::adapters::DocumentAdapter::open(&path)
            })
            .await
            .map_err(|err| StoreError::backend(BackendKind::Document, err))??;
            Ok(Box::new(adapter))
        }
        #[cfg(not(feature = "redb"))]
        BackendConfig::Document { .. } => Err(StoreError::backend(
            BackendKind::Document,
            "compiled without the `redb` feature",
        )),
        #[cfg(feature = "sqlite")]
        BackendConfig::Relational { url } => Ok(Box::new(
            crate::storage::adapters::RelationalAdapter::connect(url).await?,
        )),
        #[cfg(not(feature = "sqlite"))]
        BackendConfig::Relational { .. } => Err(StoreError::backend(
            BackendKind::Relational,
            "compiled without the `sqlite` feature",
        )),
    }
}
