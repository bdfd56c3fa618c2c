//! Ledger core: record model, field paths, update patches, and the error
//! taxonomy shared by every store operation.

pub mod error;
pub mod path;
pub mod projection;
pub mod record;
pub mod update;

pub use error::{BackendKind, StoreError};
pub use path::FieldPath;
pub use projection::{FieldSelection, Projection};
pub use record::{now_millis, validate_key, NewRecord, Record, RecordStatus};
pub use update::{Patch, PathSpec, UpdateSpec};
