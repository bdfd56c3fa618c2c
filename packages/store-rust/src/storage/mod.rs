//! Storage layer of the ledger store.
//!
//! - [`BackendAdapter`]: uniform CRUD over a persistence engine, with
//!   implementations in [`adapters`]
//! - [`Mirror`]: the ordered in-memory copy of every record
//! - [`LedgerObserver`] / [`CompositeObserver`]: hooks run after committed
//!   mutations
//! - [`StoreFactory`]: builds an adapter from configuration and wires a store

pub mod adapter;
pub mod adapters;
pub mod factory;
pub mod mirror;
pub mod observer;

pub use adapter::BackendAdapter;
pub use adapters::*;
pub use factory::{build_adapter, StoreFactory};
pub use mirror::{Mirror, SharedMirror};
pub use observer::{CompositeObserver, LedgerObserver};
