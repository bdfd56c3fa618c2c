//! Ledger store: a serialized, deduplicating record store over document,
//! relational and flat-file backends.

pub mod config;
pub mod service;
pub mod storage;
pub mod store;
pub mod telemetry;

pub use config::{BackendConfig, StoreArgs, StoreConfig};
pub use ledger_core::{
    BackendKind, FieldPath, FieldSelection, NewRecord, PathSpec, Projection, Record, RecordStatus, StoreError,
    UpdateSpec,
};
pub use storage::{BackendAdapter, CompositeObserver, LedgerObserver, StoreFactory};
pub use store::{LedgerStore, ReadOptions, StoreOptions};
pub use telemetry::{init_tracing, LogFormat};
