//! Serialization queue: a FIFO executor that runs one task at a time.
//!
//! [`SerialQueue<S>`] owns a piece of state `S` inside a single worker task.
//! Callers submit closures that borrow the state mutably; the worker runs
//! them strictly in submission order and does not start the next one until
//! the current one has finished, including any awaits inside it. This gives
//! the state actor-style serializability without further locking.

use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use ledger_core::StoreError;
use tokio::sync::{mpsc, oneshot};

/// A type-erased task as it travels through the channel.
type Job<S> = Box<dyn for<'a> FnOnce(&'a mut S) -> BoxFuture<'a, ()> + Send>;

fn job<S, F>(f: F) -> Job<S>
where
    F: for<'a> FnOnce(&'a mut S) -> BoxFuture<'a, ()> + Send + 'static,
{
    Box::new(f)
}

// ---------------------------------------------------------------------------
// QueueState trait
// ---------------------------------------------------------------------------

/// State owned by a [`SerialQueue`] worker.
#[async_trait]
pub trait QueueState: Send + 'static {
    /// Called once after the last queued task has finished. Default is a no-op.
    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// SerialQueue
// ---------------------------------------------------------------------------

/// Submission handle for a serialization queue.
///
/// Cheap to clone; every clone feeds the same worker.
pub struct SerialQueue<S> {
    tx: mpsc::Sender<Job<S>>,
}

impl<S> Clone for SerialQueue<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

/// Handle to the running worker, used to shut it down.
pub struct QueueWorker {
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl<S: QueueState> SerialQueue<S> {
    /// Spawns the worker that owns `state`.
    ///
    /// `capacity` bounds the number of tasks waiting in the channel; further
    /// submitters wait for room, preserving FIFO order among those admitted.
    #[must_use]
    pub fn start(mut state: S, capacity: usize) -> (Self, QueueWorker) {
        let (tx, mut rx) = mpsc::channel::<Job<S>>(capacity.max(1));
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    task = rx.recv() => match task {
                        Some(task) => run_isolated(task, &mut state).await,
                        None => break, // Every submitter is gone.
                    },
                    _ = &mut shutdown_rx => {
                        // Stop admitting work, but finish what was already queued.
                        rx.close();
                        while let Some(task) = rx.recv().await {
                            run_isolated(task, &mut state).await;
                        }
                        break;
                    }
                }
            }

            state.shutdown().await;
            tracing::debug!("serialization queue stopped");
        });

        (
            Self { tx },
            QueueWorker {
                shutdown_tx: Some(shutdown_tx),
                handle: Some(handle),
            },
        )
    }

    /// Queues `task` and waits for its result.
    ///
    /// # Errors
    ///
    /// Returns whatever the task returns, `QueueClosed` if the worker no
    /// longer accepts tasks, or `TaskAborted` if the task panicked.
    pub async fn submit<T, F>(&self, task: F) -> Result<T, StoreError>
    where
        F: for<'a> FnOnce(&'a mut S) -> BoxFuture<'a, Result<T, StoreError>> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let queued = job(move |state: &mut S| {
            Box::pin(async move {
                let outcome = task(state).await;
                // The caller may have stopped waiting; the task still ran.
                let _ = reply_tx.send(outcome);
            })
        });

        self.tx
            .send(queued)
            .await
            .map_err(|_| StoreError::QueueClosed)?;

        reply_rx.await.unwrap_or(Err(StoreError::TaskAborted))
    }

    /// Whether the worker has stopped accepting tasks.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Runs one task, containing a panic to that task.
async fn run_isolated<S>(task: Job<S>, state: &mut S) {
    if AssertUnwindSafe(task(state)).catch_unwind().await.is_err() {
        tracing::error!("queued task panicked; continuing with the next task");
    }
}

impl QueueWorker {
    /// Stops the worker after draining every task already queued, then
    /// waits for the state's shutdown hook to finish.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "serialization queue worker failed");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
