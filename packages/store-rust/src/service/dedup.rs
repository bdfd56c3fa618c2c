//! In-flight deduplication of record creation.
//!
//! Two concurrent `create` calls for the same key must not both reach the
//! backend. [`CreationDeduplicator`] keeps one shared completion handle per
//! key while a creation is in flight; a second caller for that key awaits the
//! same handle and receives the identical outcome, success or failure.

use std::future::Future;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use ledger_core::{Record, StoreError};
use tokio::sync::oneshot;

type Completion = Shared<BoxFuture<'static, Result<Record, StoreError>>>;

/// Coalesces concurrent creations of the same key.
#[derive(Clone, Default)]
pub struct CreationDeduplicator {
    pending: Arc<DashMap<String, Completion>>,
}

impl CreationDeduplicator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `work` for `key`, unless a creation for `key` is already in
    /// flight, in which case that creation's outcome is returned instead.
    ///
    /// `work` runs on its own task, so the pending entry is always cleared
    /// even when every caller stops waiting. The entry is removed before the
    /// outcome is published: a call arriving after completion starts fresh.
    ///
    /// # Errors
    ///
    /// Returns the error produced by `work`, or `TaskAborted` if it panicked.
    pub async fn run<F>(&self, key: &str, work: F) -> Result<Record, StoreError>
    where
        F: Future<Output = Result<Record, StoreError>> + Send + 'static,
    {
        let completion = match self.pending.entry(key.to_string()) {
            Entry::Occupied(entry) => {
                tracing::debug!(key, "joining in-flight creation");
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                let (tx, rx) = oneshot::channel();
                let completion: Completion = rx
                    .map(|outcome| outcome.unwrap_or(Err(StoreError::TaskAborted)))
                    .boxed()
                    .shared();
                entry.insert(completion.clone());

                let guard = PendingGuard {
                    pending: Arc::clone(&self.pending),
                    key: key.to_string(),
                };
                tokio::spawn(async move {
                    let outcome = work.await;
                    drop(guard);
                    let _ = tx.send(outcome);
                });
                completion
            }
        };
        completion.await
    }

    /// Number of keys with a creation currently in flight.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Clears a pending entry when dropped, including during a panic unwind.
struct PendingGuard {
    pending: Arc<DashMap<String, Completion>>,
    key: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.remove(&self.key);
    }
}
