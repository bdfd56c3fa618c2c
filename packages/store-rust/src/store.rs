//! The ledger record store: public façade over queue, mirror and backend.
//!
//! [`LedgerStore`] validates argument shape synchronously, then runs every
//! operation (reads included) as one task on the serialization queue. The
//! queue owns a [`StoreCore`] holding the backend adapter, the shared mirror
//! and the observers; mutations compute a patch, validate the candidate
//! record, write through the adapter and only then touch the mirror.
//! `create` is additionally funnelled through the [`CreationDeduplicator`].

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use ledger_core::{
    now_millis, validate_key, BackendKind, FieldPath, NewRecord, Patch, PathSpec, Projection,
    Record, RecordStatus, StoreError, UpdateSpec,
};
use serde_json::{Map, Value};
use tracing::{info_span, Instrument};

use crate::service::dedup::CreationDeduplicator;
use crate::service::queue::{QueueState, QueueWorker, SerialQueue};
use crate::storage::{BackendAdapter, CompositeObserver, LedgerObserver, Mirror, SharedMirror};

/// Default number of operations that may wait in the queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Construction options for [`LedgerStore::open`].
pub struct StoreOptions {
    pub queue_capacity: usize,
    pub observers: Vec<Arc<dyn LedgerObserver>>,
    /// Capability used for `query` arguments. Without one, any query is
    /// rejected with `InvalidQuery`.
    pub projection: Option<Arc<dyn Projection>>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            observers: Vec::new(),
            projection: None,
        }
    }
}

/// Shape of a read: optional path extraction, fallback value and projection.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    pub path: Option<PathSpec>,
    pub default: Option<Value>,
    pub query: Option<String>,
}

impl ReadOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn path(mut self, path: impl Into<PathSpec>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Value returned for paths that do not resolve (instead of `null`).
    #[must_use]
    pub fn default_value(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    #[must_use]
    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }
}

// ---------------------------------------------------------------------------
// StoreCore: state owned by the queue worker
// ---------------------------------------------------------------------------

/// Everything a queued operation may touch.
struct StoreCore {
    adapter: Box<dyn BackendAdapter>,
    mirror: SharedMirror,
    observer: Arc<CompositeObserver>,
    projection: Option<Arc<dyn Projection>>,
}

#[async_trait]
impl QueueState for StoreCore {
    async fn shutdown(&mut self) {
        let engine = self.adapter.kind();
        match self.adapter.close().await {
            Ok(()) => tracing::info!(%engine, "ledger backend closed"),
            Err(err) => tracing::error!(%engine, error = %err, "failed to close ledger backend"),
        }
    }
}

impl StoreCore {
    fn current(&self, key: &str) -> Result<Record, StoreError> {
        let found = self.mirror.read().get(key).cloned();
        found.ok_or_else(|| StoreError::NotFound {
            key: key.to_string(),
        })
    }

    fn project(&self, query: &str, value: &Value) -> Result<Value, StoreError> {
        let projection = self.projection.as_ref().ok_or_else(no_projection)?;
        projection
            .project(query, value)
            .map_err(|err| StoreError::InvalidQuery {
                reason: format!("{err:#}"),
            })
    }

    fn finish(&self, value: Value, query: Option<&str>) -> Result<Value, StoreError> {
        match query {
            Some(query) => self.project(query, &value),
            None => Ok(value),
        }
    }

    fn read_view(&self, record: &Record, options: &ReadOptions) -> Result<Value, StoreError> {
        let document = record.to_document();
        let value = match &options.path {
            Some(path) => path.extract(&document, options.default.as_ref()),
            None => document,
        };
        self.finish(value, options.query.as_deref())
    }

    async fn create(&mut self, new: NewRecord) -> Result<Record, StoreError> {
        let taken = self.mirror.read().contains(&new.key);
        if taken {
            return Err(StoreError::AlreadyExists { key: new.key });
        }
        let record = new.into_record(now_millis())?;
        let stored = self.adapter.insert(record).await?;

        self.mirror.write().push(stored.clone());
        self.observer.on_create(&stored);
        Ok(stored)
    }

    /// Validates `patch` against the current record, writes it through the
    /// adapter and refreshes the mirror. Nothing is written on failure.
    async fn commit(
        &mut self,
        key: &str,
        patch: &Patch,
        query: Option<&str>,
    ) -> Result<Record, StoreError> {
        let current = self.current(key)?;
        let candidate = patch.apply_to(&current)?;
        if let Some(query) = query {
            self.project(query, &candidate.to_document())?;
        }

        let updated = self.adapter.update_by_key(key, patch).await?;

        let previous = self.mirror.write().replace(updated.clone());
        match previous {
            Some(previous) => self.observer.on_update(&previous, &updated),
            None => tracing::warn!(key, "updated record was missing from the mirror"),
        }
        Ok(updated)
    }

    async fn update_status(
        &mut self,
        key: &str,
        status: RecordStatus,
        completed_at: Option<i64>,
        raw: Option<Value>,
    ) -> Result<Record, StoreError> {
        let mut fields = Map::new();
        fields.insert("status".to_string(), Value::from(status.as_str()));
        if let Some(completed_at) = completed_at {
            fields.insert("completedAt".to_string(), Value::from(completed_at));
        }
        if let Some(raw) = raw {
            fields.insert("raw".to_string(), raw);
        }
        self.commit(key, &Patch::from_fields(fields), None).await
    }

    async fn set(
        &mut self,
        key: &str,
        update: &UpdateSpec,
        query: Option<&str>,
    ) -> Result<Value, StoreError> {
        let current = self.current(key)?;
        let patch = update.compute_patch(&current.to_document())?;
        let updated = self.commit(key, &patch, query).await?;
        self.finish(updated.to_document(), query)
    }

    async fn delete_key(
        &mut self,
        key: &str,
        path: &FieldPath,
        query: Option<&str>,
    ) -> Result<Value, StoreError> {
        let current = self.current(key)?;
        let patch = Patch::removing(&current.to_document(), path)?;
        let updated = self.commit(key, &patch, query).await?;
        self.finish(updated.to_document(), query)
    }

    async fn remove(&mut self, key: &str) -> Result<bool, StoreError> {
        self.adapter.delete_by_key(key).await?;

        let removed = self.mirror.write().remove(key);
        match removed {
            Some(record) => self.observer.on_remove(&record),
            None => tracing::debug!(key, "remove of absent key"),
        }
        Ok(true)
    }
}

fn no_projection() -> StoreError {
    StoreError::InvalidQuery {
        reason: "no projection capability is configured".to_string(),
    }
}

/// Runs one façade operation inside a `ledger_op` span recording its
/// duration and outcome.
async fn instrumented<T>(
    op: &'static str,
    fut: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    let span = info_span!(
        "ledger_op",
        op,
        duration_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );

    async move {
        let start = Instant::now();
        let result = fut.await;

        #[allow(clippy::cast_possible_truncation)]
        let duration_ms = start.elapsed().as_millis() as u64;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(err) if err.is_validation() => "rejected",
            Err(_) => "error",
        };
        tracing::Span::current().record("duration_ms", duration_ms);
        tracing::Span::current().record("outcome", outcome);
        tracing::debug!(op, duration_ms, outcome, "ledger operation complete");

        result
    }
    .instrument(span)
    .await
}

// ---------------------------------------------------------------------------
// LedgerStore
// ---------------------------------------------------------------------------

/// Serialized, deduplicating record store over a [`BackendAdapter`].
pub struct LedgerStore {
    queue: SerialQueue<StoreCore>,
    worker: tokio::sync::Mutex<QueueWorker>,
    mirror: SharedMirror,
    dedup: CreationDeduplicator,
    engine: BackendKind,
    has_projection: bool,
}

impl LedgerStore {
    /// Loads the mirror from `adapter` and starts the serialization queue.
    ///
    /// # Errors
    ///
    /// Returns a backend error when the initial read fails.
    pub async fn open(
        adapter: Box<dyn BackendAdapter>,
        options: StoreOptions,
    ) -> Result<Self, StoreError> {
        let engine = adapter.kind();
        let records = adapter.read().await?;
        let count = records.len();
        let mirror = Mirror::new(records).shared();

        let observer = Arc::new(CompositeObserver::new(options.observers));
        observer.on_load(count);
        let observers = observer.len();

        let has_projection = options.projection.is_some();
        let core = StoreCore {
            adapter,
            mirror: Arc::clone(&mirror),
            observer,
            projection: options.projection,
        };
        let (queue, worker) = SerialQueue::start(core, options.queue_capacity);

        tracing::info!(%engine, records = count, observers, "ledger store opened");
        Ok(Self {
            queue,
            worker: tokio::sync::Mutex::new(worker),
            mirror,
            dedup: CreationDeduplicator::new(),
            engine,
            has_projection,
        })
    }

    /// Engine behind this store.
    #[must_use]
    pub fn engine(&self) -> BackendKind {
        self.engine
    }

    fn check_query(&self, query: Option<&str>) -> Result<Option<String>, StoreError> {
        match query {
            None => Ok(None),
            Some(query) if query.trim().is_empty() => Err(StoreError::InvalidQuery {
                reason: "query is empty".to_string(),
            }),
            Some(_) if !self.has_projection => Err(no_projection()),
            Some(query) => Ok(Some(query.to_string())),
        }
    }

    async fn run<T, F>(&self, op: &'static str, task: F) -> Result<T, StoreError>
    where
        F: for<'a> FnOnce(&'a mut StoreCore) -> BoxFuture<'a, Result<T, StoreError>>
            + Send
            + 'static,
        T: Send + 'static,
    {
        instrumented(op, self.queue.submit(task)).await
    }

    /// Creates a `PENDING` record.
    ///
    /// Concurrent calls for the same key share one execution and observe the
    /// same outcome.
    ///
    /// # Errors
    ///
    /// `InvalidKey`, `AlreadyExists`, `MissingFields`, or a backend error.
    pub async fn create(&self, record: NewRecord) -> Result<Record, StoreError> {
        record.validate_key()?;
        let key = record.key.clone();
        let queue = self.queue.clone();
        let work = async move {
            instrumented(
                "create",
                queue.submit(move |core: &mut StoreCore| Box::pin(core.create(record))),
            )
            .await
        };
        self.dedup.run(&key, work).await
    }

    /// Sets `status`, and `completedAt` / `raw` when supplied.
    ///
    /// # Errors
    ///
    /// `InvalidKey`, `NotFound`, or a backend error.
    pub async fn update_status(
        &self,
        key: &str,
        status: RecordStatus,
        completed_at: Option<i64>,
        raw: Option<Value>,
    ) -> Result<Record, StoreError> {
        validate_key(key)?;
        let key = key.to_string();
        self.run("update_status", move |core: &mut StoreCore| {
            Box::pin(async move { core.update_status(&key, status, completed_at, raw).await })
        })
        .await
    }

    /// Reads one record, optionally extracting path(s) and projecting.
    ///
    /// # Errors
    ///
    /// `InvalidKey`, `NotFound`, `InvalidQuery`.
    pub async fn get(&self, key: &str, options: ReadOptions) -> Result<Value, StoreError> {
        validate_key(key)?;
        self.check_query(options.query.as_deref())?;
        let key = key.to_string();
        self.run("get", move |core: &mut StoreCore| {
            Box::pin(async move {
                let record = core.current(&key)?;
                core.read_view(&record, &options)
            })
        })
        .await
    }

    /// Reads every record in mirror order, each shaped by `options`.
    ///
    /// # Errors
    ///
    /// `InvalidQuery`.
    pub async fn get_all(&self, options: ReadOptions) -> Result<Vec<Value>, StoreError> {
        self.check_query(options.query.as_deref())?;
        self.run("get_all", move |core: &mut StoreCore| {
            Box::pin(async move {
                let records = core.mirror.read().snapshot();
                records
                    .iter()
                    .map(|record| core.read_view(record, &options))
                    .collect::<Result<Vec<_>, _>>()
            })
        })
        .await
    }

    /// Reads every record whose `secondaryKey` equals `secondary_key`.
    ///
    /// # Errors
    ///
    /// `InvalidSecondaryKey`, `InvalidQuery`.
    pub async fn get_by_secondary_key(
        &self,
        secondary_key: &str,
        query: Option<&str>,
    ) -> Result<Vec<Value>, StoreError> {
        if secondary_key.trim().is_empty() {
            return Err(StoreError::InvalidSecondaryKey {
                reason: "secondary key must be a non-empty string".to_string(),
            });
        }
        let query = self.check_query(query)?;
        let secondary_key = secondary_key.to_string();
        self.run("get_by_secondary_key", move |core: &mut StoreCore| {
            Box::pin(async move {
                let matches: Vec<Record> = core
                    .mirror
                    .read()
                    .by_secondary_key(&secondary_key)
                    .cloned()
                    .collect();
                matches
                    .into_iter()
                    .map(|record| core.finish(record.to_document(), query.as_deref()))
                    .collect::<Result<Vec<_>, _>>()
            })
        })
        .await
    }

    /// Writes `data` into the record: as a whole-object merge without a path,
    /// at the given path, or element-wise across a path list.
    ///
    /// # Errors
    ///
    /// `InvalidKey`, `InvalidUpdateData`, `InvalidPath`, `InvalidStatus`,
    /// `InvalidQuery`, `NotFound`, or a backend error.
    pub async fn set(
        &self,
        key: &str,
        data: Value,
        path: Option<PathSpec>,
        query: Option<&str>,
    ) -> Result<Value, StoreError> {
        validate_key(key)?;
        let update = UpdateSpec::from_parts(data, path)?;
        let query = self.check_query(query)?;
        let key = key.to_string();
        self.run("set", move |core: &mut StoreCore| {
            Box::pin(async move { core.set(&key, &update, query.as_deref()).await })
        })
        .await
    }

    /// Removes the leaf at `path` (depth two or more) from the record.
    ///
    /// # Errors
    ///
    /// `InvalidKey`, `InvalidPath`, `KeyNotFound`, `InvalidQuery`,
    /// `NotFound`, or a backend error.
    pub async fn delete_key(
        &self,
        key: &str,
        path: FieldPath,
        query: Option<&str>,
    ) -> Result<Value, StoreError> {
        validate_key(key)?;
        if path.depth() < 2 {
            return Err(StoreError::InvalidPath {
                path: path.to_string(),
                reason: "top-level fields cannot be deleted".to_string(),
            });
        }
        let query = self.check_query(query)?;
        let key = key.to_string();
        self.run("delete_key", move |core: &mut StoreCore| {
            Box::pin(async move { core.delete_key(&key, &path, query.as_deref()).await })
        })
        .await
    }

    /// Deletes the record. Succeeds with `true` whether or not it existed.
    ///
    /// # Errors
    ///
    /// `InvalidKey`, or a backend error.
    pub async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        validate_key(key)?;
        let key = key.to_string();
        self.run("remove", move |core: &mut StoreCore| {
            Box::pin(async move { core.remove(&key).await })
        })
        .await
    }

    /// Whether `key` is present. Reads the mirror directly without queuing,
    /// so it may not reflect operations still waiting in the queue.
    #[must_use]
    pub fn exists(&self, key: &str) -> bool {
        self.mirror.read().contains(key)
    }

    /// Number of records, observed in queue order.
    ///
    /// # Errors
    ///
    /// `QueueClosed` after [`close`](Self::close).
    pub async fn len(&self) -> Result<usize, StoreError> {
        self.run("len", |core: &mut StoreCore| {
            Box::pin(async move { Ok::<_, StoreError>(core.mirror.read().len()) })
        })
        .await
    }

    /// Whether the store holds no records, observed in queue order.
    ///
    /// # Errors
    ///
    /// `QueueClosed` after [`close`](Self::close).
    pub async fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len().await? == 0)
    }

    /// Stops accepting operations, finishes the queued ones and closes the
    /// backend. Later calls fail with `QueueClosed`.
    pub async fn close(&self) {
        self.worker.lock().await.stop().await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use ledger_core::FieldSelection;
    use serde_json::json;

    use super::*;
    use crate::storage::MemoryAdapter;

    async fn store_over(adapter: Arc<MemoryAdapter>, options: StoreOptions) -> LedgerStore {
        LedgerStore::open(Box::new(adapter), options).await.unwrap()
    }

    async fn store() -> (LedgerStore, Arc<MemoryAdapter>) {
        let adapter = Arc::new(MemoryAdapter::new());
        let options = StoreOptions {
            projection: Some(Arc::new(FieldSelection)),
            ..StoreOptions::default()
        };
        (store_over(adapter.clone(), options).await, adapter)
    }

    fn tx(key: &str) -> NewRecord {
        NewRecord::new(key)
            .secondary_key("g1")
            .amount(1000)
            .link_id("L1")
    }

    fn path(p: &str) -> FieldPath {
        FieldPath::parse(p).unwrap()
    }

    #[tokio::test]
    async fn payment_lifecycle() {
        let (store, _) = store().await;

        let created = store.create(tx("tx1")).await.unwrap();
        assert_eq!(created.status, RecordStatus::Pending);
        assert_eq!(created.completed_at, None);

        let paid = store
            .update_status("tx1", RecordStatus::Paid, Some(1_700_000_000_000), None)
            .await
            .unwrap();
        assert_eq!(paid.status, RecordStatus::Paid);
        assert_eq!(paid.completed_at, Some(1_700_000_000_000));
        assert_eq!(paid.amount, 1000);

        let group = store.get_by_secondary_key("g1", None).await.unwrap();
        assert_eq!(group.len(), 1);
        assert_eq!(group[0]["status"], "PAID");
    }

    #[tokio::test]
    async fn get_returns_created_record() {
        let (store, _) = store().await;
        let created = store
            .create(tx("tx1").description("coffee").raw(json!({"sub": 5})))
            .await
            .unwrap();

        let fetched = store.get("tx1", ReadOptions::new()).await.unwrap();
        assert_eq!(fetched, created.to_document());
        assert_eq!(fetched["description"], "coffee");
        assert!(fetched["createdAt"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn create_rejects_duplicates_and_incomplete_payloads() {
        let (store, _) = store().await;
        store.create(tx("tx1")).await.unwrap();

        assert_eq!(
            store.create(tx("tx1")).await,
            Err(StoreError::AlreadyExists {
                key: "tx1".to_string()
            })
        );
        assert_eq!(
            store.create(NewRecord::new("tx2").amount(1)).await,
            Err(StoreError::MissingFields {
                fields: vec!["secondaryKey", "linkId"]
            })
        );
        assert!(matches!(
            store.create(NewRecord::new("  ")).await,
            Err(StoreError::InvalidKey { .. })
        ));
    }

    #[tokio::test]
    async fn concurrent_duplicate_create_inserts_once() {
        let (store, adapter) = store().await;

        let (a, b) = tokio::join!(store.create(tx("tx1")), store.create(tx("tx1")));
        assert_eq!(a, b);
        assert!(a.is_ok());
        assert_eq!(adapter.insert_count(), 1);
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_create_with_missing_fields_shares_outcome() {
        // Whichever body runs decides the outcome for both callers.
        let (store, adapter) = store().await;
        let (a, b) = tokio::join!(
            store.create(NewRecord::new("tx1").amount(5)),
            store.create(tx("tx1")),
        );
        assert_eq!(a, b);
        assert!(matches!(a, Err(StoreError::MissingFields { .. })));
        assert_eq!(adapter.insert_count(), 0);

        let (store, adapter) = self::store().await;
        let (a, b) = tokio::join!(
            store.create(tx("tx1")),
            store.create(NewRecord::new("tx1").amount(5)),
        );
        assert_eq!(a, b);
        assert!(a.is_ok());
        assert_eq!(adapter.insert_count(), 1);
    }

    #[tokio::test]
    async fn remove_then_get_is_not_found() {
        let (store, _) = store().await;
        store.create(tx("tx1")).await.unwrap();

        assert_eq!(store.remove("tx1").await, Ok(true));
        assert_eq!(store.remove("tx1").await, Ok(true), "remove is idempotent");
        assert_eq!(
            store.get("tx1", ReadOptions::new()).await,
            Err(StoreError::NotFound {
                key: "tx1".to_string()
            })
        );
        assert!(!store.exists("tx1"));
    }

    #[tokio::test]
    async fn deleted_key_can_be_recreated() {
        let (store, adapter) = store().await;
        store.create(tx("tx1")).await.unwrap();
        store.remove("tx1").await.unwrap();
        store.create(tx("tx1").amount(7)).await.unwrap();

        assert_eq!(adapter.insert_count(), 2);
        let amount = store
            .get("tx1", ReadOptions::new().path(path("amount")))
            .await
            .unwrap();
        assert_eq!(amount, json!(7));
    }

    #[tokio::test]
    async fn path_set_preserves_siblings() {
        let (store, _) = store().await;
        store.create(tx("tx1")).await.unwrap();

        store
            .set("tx1", json!({"raw": {"x": 1}}), None, None)
            .await
            .unwrap();
        let updated = store
            .set("tx1", json!(2), Some(PathSpec::single("raw.y").unwrap()), None)
            .await
            .unwrap();
        assert_eq!(updated["raw"], json!({"x": 1, "y": 2}));
    }

    #[tokio::test]
    async fn multi_path_set_and_shape_errors() {
        let (store, _) = store().await;
        store.create(tx("tx1")).await.unwrap();

        let paths = PathSpec::many(["raw.a", "description"]).unwrap();
        let updated = store
            .set("tx1", json!([1, "note"]), Some(paths.clone()), None)
            .await
            .unwrap();
        assert_eq!(updated["raw"], json!({"a": 1}));
        assert_eq!(updated["description"], "note");

        assert!(matches!(
            store.set("tx1", json!([1]), Some(paths), None).await,
            Err(StoreError::InvalidUpdateData { .. })
        ));
        assert!(matches!(
            store.set("tx1", json!("flat"), None, None).await,
            Err(StoreError::InvalidUpdateData { .. })
        ));
        assert!(matches!(
            store.set("tx1", json!({}), None, None).await,
            Err(StoreError::InvalidUpdateData { .. })
        ));
    }

    #[tokio::test]
    async fn set_rejects_bad_status_and_immutable_fields() {
        let (store, adapter) = store().await;
        store.create(tx("tx1")).await.unwrap();

        assert!(matches!(
            store
                .set("tx1", json!("SHIPPED"), Some(PathSpec::single("status").unwrap()), None)
                .await,
            Err(StoreError::InvalidStatus { .. })
        ));
        assert!(matches!(
            store.set("tx1", json!({"key": "other"}), None, None).await,
            Err(StoreError::InvalidUpdateData { .. })
        ));
        assert!(matches!(
            store.set("missing", json!({"amount": 1}), None, None).await,
            Err(StoreError::NotFound { .. })
        ));
        assert_eq!(adapter.snapshot()[0].status, RecordStatus::Pending);
    }

    #[tokio::test]
    async fn delete_key_requires_resolving_parent() {
        let (store, _) = store().await;
        store.create(tx("tx1")).await.unwrap();

        assert_eq!(
            store.delete_key("tx1", path("raw.sub"), None).await,
            Err(StoreError::KeyNotFound {
                path: "raw".to_string()
            })
        );

        store
            .set("tx1", json!({"raw": {"sub": 5, "other": 1}}), None, None)
            .await
            .unwrap();
        let updated = store.delete_key("tx1", path("raw.sub"), None).await.unwrap();
        assert_eq!(updated["raw"], json!({"other": 1}));

        // Absent leaf under an existing parent is a no-op write.
        let again = store.delete_key("tx1", path("raw.sub"), None).await.unwrap();
        assert_eq!(again["raw"], json!({"other": 1}));

        assert!(matches!(
            store.delete_key("tx1", path("raw"), None).await,
            Err(StoreError::InvalidPath { .. })
        ));
    }

    #[tokio::test]
    async fn backend_failure_leaves_mirror_untouched() {
        let (store, adapter) = store().await;
        store.create(tx("tx1")).await.unwrap();

        adapter.fail_next_write();
        let result = store
            .update_status("tx1", RecordStatus::Failed, None, None)
            .await;
        assert!(matches!(result, Err(StoreError::Backend { .. })));

        let status = store
            .get("tx1", ReadOptions::new().path(path("status")))
            .await
            .unwrap();
        assert_eq!(status, json!("PENDING"));

        adapter.fail_next_write();
        assert!(store.create(tx("tx2")).await.is_err());
        assert!(!store.exists("tx2"));
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn get_with_paths_and_default() {
        let (store, _) = store().await;
        store.create(tx("tx1").raw(json!({"sub": 5}))).await.unwrap();

        let value = store
            .get("tx1", ReadOptions::new().path(path("raw.sub")))
            .await
            .unwrap();
        assert_eq!(value, json!(5));

        let missing = store
            .get("tx1", ReadOptions::new().path(path("raw.nope")))
            .await
            .unwrap();
        assert_eq!(missing, Value::Null);

        let many = store
            .get(
                "tx1",
                ReadOptions::new()
                    .path(PathSpec::many(["amount", "raw.nope"]).unwrap())
                    .default_value(json!(0)),
            )
            .await
            .unwrap();
        assert_eq!(many, json!([1000, 0]));
    }

    #[tokio::test]
    async fn get_all_preserves_creation_order() {
        let (store, _) = store().await;
        for key in ["c", "a", "b"] {
            store.create(tx(key)).await.unwrap();
        }
        let keys = store
            .get_all(ReadOptions::new().path(path("key")))
            .await
            .unwrap();
        assert_eq!(keys, vec![json!("c"), json!("a"), json!("b")]);
    }

    #[tokio::test]
    async fn queries_are_projected_or_rejected() {
        let (store, _) = store().await;
        store.create(tx("tx1")).await.unwrap();

        let view = store
            .get("tx1", ReadOptions::new().query("status amount"))
            .await
            .unwrap();
        assert_eq!(view, json!({"status": "PENDING", "amount": 1000}));

        let projected = store
            .set("tx1", json!({"amount": 5}), None, Some("amount"))
            .await
            .unwrap();
        assert_eq!(projected, json!({"amount": 5}));

        assert!(matches!(
            store.get("tx1", ReadOptions::new().query("  ")).await,
            Err(StoreError::InvalidQuery { .. })
        ));

        // A failing projection aborts the mutation before the write.
        assert!(matches!(
            store.set("tx1", json!({"amount": 9}), None, Some("raw..x")).await,
            Err(StoreError::InvalidQuery { .. })
        ));
        let amount = store
            .get("tx1", ReadOptions::new().path(path("amount")))
            .await
            .unwrap();
        assert_eq!(amount, json!(5));
    }

    #[tokio::test]
    async fn query_without_projection_is_rejected() {
        let adapter = Arc::new(MemoryAdapter::new());
        let store = store_over(adapter, StoreOptions::default()).await;
        assert_eq!(
            store.get_all(ReadOptions::new().query("amount")).await,
            Err(no_projection())
        );
    }

    #[tokio::test]
    async fn argument_shape_is_checked_before_queuing() {
        let (store, _) = store().await;
        assert!(matches!(
            store.get("", ReadOptions::new()).await,
            Err(StoreError::InvalidKey { .. })
        ));
        assert!(matches!(
            store.get_by_secondary_key("", None).await,
            Err(StoreError::InvalidSecondaryKey { .. })
        ));
        assert!(matches!(
            store.remove("").await,
            Err(StoreError::InvalidKey { .. })
        ));
    }

    #[tokio::test]
    async fn opens_over_existing_records() {
        let seeded = tx("old").into_record(5).unwrap();
        let adapter = Arc::new(MemoryAdapter::with_records(vec![seeded]));
        let store = store_over(adapter, StoreOptions::default()).await;

        assert!(store.exists("old"));
        assert_eq!(store.len().await.unwrap(), 1);
        assert_eq!(store.engine(), BackendKind::Memory);
    }

    #[derive(Default)]
    struct Tally {
        loads: AtomicUsize,
        creates: AtomicUsize,
        updates: AtomicUsize,
        removes: AtomicUsize,
    }

    impl LedgerObserver for Tally {
        fn on_load(&self, count: usize) {
            self.loads.fetch_add(count + 1, Ordering::SeqCst);
        }
        fn on_create(&self, _: &Record) {
            self.creates.fetch_add(1, Ordering::SeqCst);
        }
        fn on_update(&self, old: &Record, new: &Record) {
            assert_eq!(old.key, new.key);
            self.updates.fetch_add(1, Ordering::SeqCst);
        }
        fn on_remove(&self, _: &Record) {
            self.removes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn observers_see_committed_mutations_only() {
        let tally = Arc::new(Tally::default());
        let adapter = Arc::new(MemoryAdapter::new());
        let store = store_over(
            adapter.clone(),
            StoreOptions {
                observers: vec![tally.clone() as Arc<dyn LedgerObserver>],
                ..StoreOptions::default()
            },
        )
        .await;

        store.create(tx("tx1")).await.unwrap();
        store
            .update_status("tx1", RecordStatus::Paid, None, None)
            .await
            .unwrap();
        adapter.fail_next_write();
        let _ = store.set("tx1", json!({"amount": 1}), None, None).await;
        store.remove("tx1").await.unwrap();
        store.remove("tx1").await.unwrap();

        assert_eq!(tally.loads.load(Ordering::SeqCst), 1);
        assert_eq!(tally.creates.load(Ordering::SeqCst), 1);
        assert_eq!(tally.updates.load(Ordering::SeqCst), 1);
        assert_eq!(tally.removes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_drains_and_rejects_later_calls() {
        let (store, _) = store().await;
        let store = Arc::new(store);

        let pending = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.create(tx("tx1")).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.close().await;

        assert!(pending.await.unwrap().is_ok());
        assert_eq!(store.len().await, Err(StoreError::QueueClosed));
        assert_eq!(
            store.get("tx1", ReadOptions::new()).await,
            Err(StoreError::QueueClosed)
        );
        assert!(store.exists("tx1"), "mirror stays readable after close");
    }
}
