//! Operation execution: the serialization queue every store operation runs
//! on, and the deduplicator that coalesces concurrent creations.

pub mod dedup;
pub mod queue;

pub use dedup::CreationDeduplicator;
pub use queue::{QueueState, QueueWorker, SerialQueue};
