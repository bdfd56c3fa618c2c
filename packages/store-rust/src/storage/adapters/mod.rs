//! `BackendAdapter` implementations.
//!
//! Provides the concrete engines behind the
//! [`BackendAdapter`](super::BackendAdapter) trait: a flat JSON file, an
//! embedded document store (`redb` feature), a relational table (`sqlite`
//! feature), and process memory.

#[cfg(feature = "redb")]
mod document;
mod flat_file;
mod memory;
#[cfg(feature = "sqlite")]
mod relational;

#[cfg(feature = "redb")]
pub use document::DocumentAdapter;
pub use flat_file::FlatFileAdapter;
pub use memory::MemoryAdapter;
#[cfg(feature = "sqlite")]
pub use relational::RelationalAdapter;
