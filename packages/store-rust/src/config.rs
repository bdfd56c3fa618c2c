//! Store configuration and its command-line / environment surface.

use std::path::PathBuf;

use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::store::DEFAULT_QUEUE_CAPACITY;

/// Which engine to persist records in, with its location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum BackendConfig {
    /// Embedded document store file.
    Document { path: PathBuf },
    /// SQL database URL, e.g. `sqlite://ledger.db?mode=rwc`.
    Relational { url: String },
    /// JSON array file.
    FlatFile { path: PathBuf },
    /// Process-local, nothing persisted.
    Memory,
}

/// Top-level configuration for a ledger store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: BackendConfig,
    /// Operations that may wait in the serialization queue before callers
    /// are made to wait for room.
    pub queue_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::FlatFile {
                path: PathBuf::from("ledger.json"),
            },
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Engine names accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendChoice {
    Document,
    Relational,
    FlatFile,
    Memory,
}

/// Command-line arguments for embedding in a binary's parser with
/// `#[command(flatten)]`.
#[derive(Debug, Clone, Args)]
pub struct StoreArgs {
    /// Storage engine.
    #[arg(long, env = "LEDGER_BACKEND", value_enum, default_value_t = BackendChoice::FlatFile)]
    pub backend: BackendChoice,

    /// File used by the document and flat-file engines.
    #[arg(long, env = "LEDGER_PATH")]
    pub path: Option<PathBuf>,

    /// Connection URL for the relational engine.
    #[arg(long, env = "LEDGER_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Serialization queue capacity.
    #[arg(long, env = "LEDGER_QUEUE_CAPACITY", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,
}

impl StoreArgs {
    /// Resolves the arguments into a [`StoreConfig`].
    ///
    /// # Errors
    ///
    /// Fails when the relational engine is chosen without a database URL.
    pub fn into_config(self) -> anyhow::Result<StoreConfig> {
        let backend = match self.backend {
            BackendChoice::Document => BackendConfig::Document {
                path: self.path.unwrap_or_else(|| PathBuf::from("ledger.redb")),
            },
            BackendChoice::Relational => BackendConfig::Relational {
                url: self.database_url.ok_or_else(|| {
                    anyhow::anyhow!("--database-url (LEDGER_DATABASE_URL) is required for the relational backend")
                })?,
            },
            BackendChoice::FlatFile => BackendConfig::FlatFile {
                path: self.path.unwrap_or_else(|| PathBuf::from("ledger.json")),
            },
            BackendChoice::Memory => BackendConfig::Memory,
        };
        Ok(StoreConfig {
            backend,
            queue_capacity: self.queue_capacity,
        })
    }
}
