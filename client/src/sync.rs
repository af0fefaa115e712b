//! SyncEngine: push and pull orchestration.
//!
//! Push drains a collection's queue in sequence order and applies each reply
//! to the local store. Pull fetches pages of remote changes after the stored
//! cursor and merges each page in one transaction.
//!
//! Calls for one collection are serialized by a per-collection lock; push,
//! pull and sync on different collections run independently.

use crate::config::{RetryPolicy, SyncConfig};
use crate::error::Result;
use crate::store::LocalStore;
use crate::transport::{HttpRemote, Remote};
use ferry_engine::{
    CollectionName, Conflict, ConflictPolicy, Error, Failure, Operation, Predicate,
    PullConflict, PullRequest, PushReply, RecordKey, RemoteRecord, Resolution, Seq,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex as TokioMutex;

/// Outcome of a push.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushResult {
    /// Operations the remote accepted, in send order
    pub acknowledged: Vec<Seq>,
    /// Conflicts left unresolved; their operations are Failed
    pub conflicts: Vec<Conflict>,
    /// Conflicts settled by the resolver
    pub resolved: usize,
}

/// Outcome of a pull.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PullResult {
    pub pages: usize,
    pub inserted: usize,
    pub updated: usize,
    pub purged: usize,
    pub unchanged: usize,
    /// Remote changes staged beside unsynced local edits
    pub conflicts: Vec<PullConflict>,
    /// Query cursor after the pull
    pub cursor: u64,
}

/// Outcome of a push followed by a pull.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncResult {
    pub push: PushResult,
    pub pull: PullResult,
}

/// Something a UI may want to show.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    PushConflict(Conflict),
    PullConflict(PullConflict),
    Error {
        collection: CollectionName,
        error: Error,
    },
}

/// Callback receiving [`SyncEvent`]s.
pub type SyncObserver = dyn Fn(&SyncEvent) + Send + Sync;

/// Stops sync attempts between steps.
///
/// Once cancelled, every attempt fails with [`Error::Cancelled`] at its next
/// step until [`reset`](CancelHandle::reset) is called.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

pub struct SyncEngine {
    store: Arc<LocalStore>,
    remote: Arc<dyn Remote>,
    policy: ConflictPolicy,
    push_batch_size: usize,
    pull_page_size: usize,
    retry: RetryPolicy,
    observer: Option<Arc<SyncObserver>>,
    cancel: CancelHandle,
    /// Per-collection async locks for serializing push and pull
    locks: Mutex<HashMap<String, Arc<TokioMutex<()>>>>,
}

impl SyncEngine {
    /// Create an engine over any transport with default settings.
    pub fn new(store: Arc<LocalStore>, remote: Arc<dyn Remote>) -> Self {
        let config = SyncConfig::default();
        Self {
            store,
            remote,
            policy: config.conflict_policy,
            push_batch_size: config.push_batch_size,
            pull_page_size: config.pull_page_size,
            retry: config.retry,
            observer: None,
            cancel: CancelHandle::default(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Create an engine talking HTTP to `config.endpoint`.
    ///
    /// A missing or malformed endpoint is a configuration error.
    pub async fn connect(store: Arc<LocalStore>, config: &SyncConfig) -> Result<Self> {
        config.validate()?;
        let endpoint = config
            .endpoint
            .as_deref()
            .ok_or_else(|| Error::Configuration("no sync endpoint configured".into()))?;
        let remote = HttpRemote::new(endpoint, config.request_timeout)?;
        store.set_queue_capacity(config.queue_capacity).await;

        Ok(Self::new(store, Arc::new(remote)).with_config(config))
    }

    /// Apply batch sizes, retry and conflict policy from a config.
    pub fn with_config(mut self, config: &SyncConfig) -> Self {
        self.policy = config.conflict_policy.clone();
        self.push_batch_size = config.push_batch_size.max(1);
        self.pull_page_size = config.pull_page_size.max(1);
        self.retry = config.retry;
        self
    }

    pub fn with_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    /// Handle that cancels this engine's attempts.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    // -----------------------------------------------------------------------
    // Public API
    // -----------------------------------------------------------------------

    /// Send a collection's queued operations to the remote.
    pub async fn push(&self, collection: &str) -> Result<PushResult> {
        let lock = self.lock_for(collection);
        let _guard = lock.lock().await;
        self.report(collection, self.push_impl(collection).await)
    }

    /// Fetch and merge remote changes for a named query.
    pub async fn pull(
        &self,
        collection: &str,
        query: &str,
        predicate: &Predicate,
    ) -> Result<PullResult> {
        let lock = self.lock_for(collection);
        let _guard = lock.lock().await;
        self.report(collection, self.pull_impl(collection, query, predicate).await)
    }

    /// Push then pull, retrying the pair on transport failures.
    pub async fn sync(
        &self,
        collection: &str,
        query: &str,
        predicate: &Predicate,
    ) -> Result<SyncResult> {
        let lock = self.lock_for(collection);
        let _guard = lock.lock().await;

        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            let outcome = self.sync_once(collection, query, predicate).await;
            match outcome {
                Err(err) if err.is_retryable() && attempt < attempts => {
                    tracing::warn!(
                        collection,
                        attempt,
                        error = %err,
                        "sync attempt failed; retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(self.retry.backoff).await;
                }
                outcome => return self.report(collection, outcome),
            }
        }
    }

    async fn sync_once(
        &self,
        collection: &str,
        query: &str,
        predicate: &Predicate,
    ) -> Result<SyncResult> {
        let push = self.push_impl(collection).await?;
        let pull = self.pull_impl(collection, query, predicate).await?;
        Ok(SyncResult { push, pull })
    }

    // -----------------------------------------------------------------------
    // Push
    // -----------------------------------------------------------------------

    async fn push_impl(&self, collection: &str) -> Result<PushResult> {
        let mut result = PushResult::default();
        if let Err(err) = self.push_batches(collection, &mut result).await {
            // An aborted attempt leaves nothing in flight
            if let Err(release) = self.store.release_in_flight(collection).await {
                tracing::error!(
                    collection,
                    error = %release,
                    "releasing in-flight operations failed"
                );
            }
            return Err(err);
        }

        if !result.acknowledged.is_empty() || !result.conflicts.is_empty() {
            tracing::info!(
                collection,
                acknowledged = result.acknowledged.len(),
                conflicts = result.conflicts.len(),
                resolved = result.resolved,
                "push finished"
            );
        }
        Ok(result)
    }

    async fn push_batches(&self, collection: &str, result: &mut PushResult) -> Result<()> {
        // Operations already resent once after a resolution
        let mut resent: HashSet<Seq> = HashSet::new();

        loop {
            self.check_cancelled(collection).await?;

            let batch = self
                .store
                .dequeue_batch(collection, self.push_batch_size)
                .await?;
            if batch.is_empty() {
                break;
            }
            tracing::debug!(collection, count = batch.len(), "pushing batch");

            // Keys with a conflict in this batch; their later operations wait
            let mut held: HashSet<RecordKey> = HashSet::new();
            for op in batch {
                if held.contains(&op.key) {
                    self.store.release(&op).await?;
                    continue;
                }
                self.check_cancelled(collection).await?;

                let reply = self.remote.push(&op.to_push_request()).await?;

                match reply {
                    PushReply::Accepted { version, .. } => {
                        tracing::debug!(
                            collection,
                            key = %op.key,
                            seq = op.seq,
                            %version,
                            "operation accepted"
                        );
                        self.store.acknowledge(&op, version).await?;
                        result.acknowledged.push(op.seq);
                    }
                    PushReply::Conflict { current } => {
                        held.insert(op.key.clone());
                        let conflict = self.record_conflict(&op, current).await?;
                        self.handle_conflict(collection, conflict, &mut resent, result).await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Mark a rejected operation failed with both sides' snapshots.
    async fn record_conflict(
        &self,
        op: &Operation,
        current: Option<RemoteRecord>,
    ) -> Result<Conflict> {
        let conflict = Conflict {
            seq: op.seq,
            collection: op.collection.clone(),
            key: op.key.clone(),
            kind: op.kind,
            base_version: op.base_version.clone(),
            local: self.store.record(&op.collection, &op.key).await?,
            remote: current,
        };
        tracing::warn!(
            collection = %op.collection,
            key = %op.key,
            seq = op.seq,
            base = ?op.base_version,
            remote = ?conflict.remote_version(),
            "push conflict"
        );
        self.store
            .fail(op, Failure::conflict(conflict.clone()))
            .await?;
        self.emit(&SyncEvent::PushConflict(conflict.clone()));
        Ok(conflict)
    }

    async fn handle_conflict(
        &self,
        collection: &str,
        conflict: Conflict,
        resent: &mut HashSet<Seq>,
        result: &mut PushResult,
    ) -> Result<()> {
        let resolver = match &self.policy {
            ConflictPolicy::FailFast => return Err(conflict.into()),
            ConflictPolicy::Continue => {
                result.conflicts.push(conflict);
                return Ok(());
            }
            ConflictPolicy::Resolve(resolver) => Arc::clone(resolver),
        };

        if resent.contains(&conflict.seq) {
            tracing::warn!(
                collection,
                seq = conflict.seq,
                "conflict after resolution; leaving failed"
            );
            result.conflicts.push(conflict);
            return Ok(());
        }

        // Rebase onto the remote's live version; without one the record is recreated
        let base = conflict
            .remote
            .as_ref()
            .filter(|remote| !remote.deleted)
            .map(|remote| remote.version.clone());

        let resolution = resolver(&conflict);
        tracing::debug!(collection, seq = conflict.seq, ?resolution, "conflict resolved");
        match resolution {
            Resolution::KeepLocal => {
                self.store.rebase(conflict.seq, base, None).await?;
                resent.insert(conflict.seq);
            }
            Resolution::Merge(fields) => {
                self.store.rebase(conflict.seq, base, Some(fields)).await?;
                resent.insert(conflict.seq);
            }
            Resolution::KeepRemote => {
                self.store
                    .discard_for_remote(conflict.seq, conflict.remote.as_ref())
                    .await?;
            }
            Resolution::Defer => {
                result.conflicts.push(conflict);
                return Ok(());
            }
        }
        result.resolved += 1;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Pull
    // -----------------------------------------------------------------------

    async fn pull_impl(
        &self,
        collection: &str,
        query: &str,
        predicate: &Predicate,
    ) -> Result<PullResult> {
        let mut result = PullResult {
            cursor: self.store.cursor(collection, query).await?,
            ..PullResult::default()
        };

        loop {
            self.check_cancelled(collection).await?;

            let request = PullRequest {
                since: result.cursor,
                limit: self.pull_page_size,
                filter: predicate.clone(),
            };
            let page = self.remote.pull(collection, &request).await?;
            let merged = self.store.merge_page(collection, query, &page).await?;

            for conflict in &merged.conflicts {
                tracing::warn!(
                    collection,
                    key = %conflict.key,
                    "remote change held back by local edit"
                );
                self.emit(&SyncEvent::PullConflict(conflict.clone()));
            }

            let progressed = merged.cursor > result.cursor;
            result.pages += 1;
            result.inserted += merged.inserted.len();
            result.updated += merged.updated.len();
            result.purged += merged.purged.len();
            result.unchanged += merged.unchanged.len();
            result.conflicts.extend(merged.conflicts);
            result.cursor = merged.cursor;

            if page.end || !progressed {
                break;
            }
        }

        tracing::debug!(
            collection,
            query,
            pages = result.pages,
            inserted = result.inserted,
            updated = result.updated,
            purged = result.purged,
            cursor = result.cursor,
            "pull finished"
        );
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn lock_for(&self, collection: &str) -> Arc<TokioMutex<()>> {
        let mut locks = self.locks.lock();
        locks
            .entry(collection.to_string())
            .or_insert_with(|| Arc::new(TokioMutex::new(())))
            .clone()
    }

    async fn check_cancelled(&self, collection: &str) -> Result<()> {
        if !self.cancel.is_cancelled() {
            return Ok(());
        }
        tracing::info!(collection, "sync cancelled");
        Err(Error::Cancelled)
    }

    fn report<T>(&self, collection: &str, outcome: Result<T>) -> Result<T> {
        if let Err(error) = &outcome {
            tracing::error!(collection, %error, "sync failed");
            self.emit(&SyncEvent::Error {
                collection: collection.to_string(),
                error: error.clone(),
            });
        }
        outcome
    }

    fn emit(&self, event: &SyncEvent) {
        if let Some(observer) = &self.observer {
            // A panicking observer must not abort a sync midway
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| observer(event)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryRemote;
    use ferry_engine::{CollectionSchema, FieldDef, FieldType, Fields, OpStatus, Schema};
    use serde_json::json;

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    fn schema() -> Schema {
        Schema::new().with_collection(CollectionSchema::new(
            "todos",
            vec![
                FieldDef::required("text", FieldType::String),
                FieldDef::optional("complete", FieldType::Bool),
            ],
        ))
    }

    async fn engine(remote: &MemoryRemote) -> SyncEngine {
        let store = Arc::new(LocalStore::open_in_memory(schema()).await.unwrap());
        SyncEngine::new(store, Arc::new(remote.clone()))
    }

    #[tokio::test]
    async fn push_acknowledges_in_order() {
        let remote = MemoryRemote::new();
        let engine = engine(&remote).await;
        let store = engine.store();
        store
            .enqueue_insert("todos", "1", fields(json!({"text": "milk"})))
            .await
            .unwrap();
        store
            .enqueue_insert("todos", "2", fields(json!({"text": "eggs"})))
            .await
            .unwrap();

        let result = engine.push("todos").await.unwrap();

        assert_eq!(result.acknowledged, vec![1, 2]);
        assert_eq!(store.pending_count("todos").await.unwrap(), 0);
        let record = store.get("todos", "1").await.unwrap().unwrap();
        assert!(!record.dirty);
        assert_eq!(record.version, remote.get("todos", "1").map(|r| r.version));
    }

    #[tokio::test]
    async fn transport_failure_releases_operations() {
        let remote = MemoryRemote::new();
        let engine = engine(&remote).await;
        engine
            .store()
            .enqueue_insert("todos", "1", fields(json!({"text": "milk"})))
            .await
            .unwrap();
        remote.fail_next_push("connection reset");

        let err = engine.push("todos").await.unwrap_err();

        assert!(err.is_retryable());
        let ops = engine.store().operations("todos").await.unwrap();
        assert_eq!(ops[0].status, OpStatus::Pending);

        engine.push("todos").await.unwrap();
        assert_eq!(remote.live("todos").len(), 1);
    }

    #[tokio::test]
    async fn storage_failure_mid_push_releases_the_batch() {
        let remote = MemoryRemote::new();
        let engine = engine(&remote).await;
        let store = engine.store();
        for key in ["1", "2"] {
            store
                .enqueue_insert("todos", key, fields(json!({"text": key})))
                .await
                .unwrap();
        }
        // Acknowledging writes a version onto the record row
        sqlx::query(
            "CREATE TRIGGER refuse_versions BEFORE UPDATE ON records
             WHEN json_extract(NEW.body, '$.version') IS NOT NULL
             BEGIN SELECT RAISE(ABORT, 'disk full'); END",
        )
        .execute(store.pool())
        .await
        .unwrap();

        let err = engine.push("todos").await.unwrap_err();

        assert_eq!(err.kind(), ferry_engine::ErrorKind::Storage);
        let statuses: Vec<_> = store
            .operations("todos")
            .await
            .unwrap()
            .into_iter()
            .map(|op| (op.seq, op.status))
            .collect();
        assert_eq!(statuses, vec![(1, OpStatus::Pending), (2, OpStatus::Pending)]);

        sqlx::query("DROP TRIGGER refuse_versions")
            .execute(store.pool())
            .await
            .unwrap();
        let result = engine.push("todos").await.unwrap();

        assert_eq!(result.acknowledged, vec![1, 2]);
        assert_eq!(store.pending_count("todos").await.unwrap(), 0);
        assert_eq!(remote.live("todos").len(), 2);
    }

    #[tokio::test]
    async fn lost_reply_is_replayed_without_duplicates() {
        let remote = MemoryRemote::new();
        let engine = engine(&remote).await;
        engine
            .store()
            .enqueue_insert("todos", "1", fields(json!({"text": "milk"})))
            .await
            .unwrap();
        remote.drop_next_reply();

        assert!(engine.push("todos").await.is_err());
        let result = engine.push("todos").await.unwrap();

        assert_eq!(result.acknowledged, vec![1]);
        assert!(result.conflicts.is_empty());
        assert_eq!(remote.pushed().len(), 2);
        assert_eq!(remote.pushed()[0].op_id, remote.pushed()[1].op_id);
    }

    #[tokio::test]
    async fn fail_fast_stops_at_first_conflict() {
        let remote = MemoryRemote::new();
        remote.write("todos", "1", fields(json!({"text": "theirs"})));
        let engine = engine(&remote).await;
        let store = engine.store();
        store
            .enqueue_insert("todos", "1", fields(json!({"text": "mine"})))
            .await
            .unwrap();
        store
            .enqueue_insert("todos", "2", fields(json!({"text": "eggs"})))
            .await
            .unwrap();

        let err = engine.push("todos").await.unwrap_err();

        let conflict = err.conflict().unwrap();
        assert_eq!(conflict.key, "1");
        assert_eq!(conflict.remote.as_ref().unwrap().fields["text"], "theirs");
        assert_eq!(conflict.local.as_ref().unwrap().fields["text"], "mine");
        assert_eq!(store.failed("todos").await.unwrap().len(), 1);
        // The independent key was not sent and is pending again
        assert!(remote.get("todos", "2").is_none());
        let ops = store.operations("todos").await.unwrap();
        assert_eq!(ops[1].status, OpStatus::Pending);
    }

    #[tokio::test]
    async fn continue_policy_pushes_independent_keys() {
        let remote = MemoryRemote::new();
        remote.write("todos", "1", fields(json!({"text": "theirs"})));
        let engine = engine(&remote).await
            .with_policy(ConflictPolicy::Continue);
        let store = engine.store();
        store
            .enqueue_insert("todos", "1", fields(json!({"text": "mine"})))
            .await
            .unwrap();
        store
            .enqueue_insert("todos", "2", fields(json!({"text": "eggs"})))
            .await
            .unwrap();

        let result = engine.push("todos").await.unwrap();

        assert_eq!(result.acknowledged, vec![2]);
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].key, "1");
    }

    #[tokio::test]
    async fn keep_local_overwrites_remote() {
        let remote = MemoryRemote::new();
        remote.write("todos", "1", fields(json!({"text": "theirs"})));
        let engine = engine(&remote).await
            .with_policy(ConflictPolicy::resolve_with(|_| Resolution::KeepLocal));
        engine
            .store()
            .enqueue_insert("todos", "1", fields(json!({"text": "mine"})))
            .await
            .unwrap();

        let result = engine.push("todos").await.unwrap();

        assert_eq!(result.resolved, 1);
        assert!(result.conflicts.is_empty());
        assert_eq!(remote.get("todos", "1").unwrap().fields["text"], "mine");
        assert_eq!(engine.store().pending_count("todos").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn keep_remote_adopts_remote_record() {
        let remote = MemoryRemote::new();
        remote.write("todos", "1", fields(json!({"text": "theirs"})));
        let engine = engine(&remote).await
            .with_policy(ConflictPolicy::resolve_with(|_| Resolution::KeepRemote));
        engine
            .store()
            .enqueue_insert("todos", "1", fields(json!({"text": "mine"})))
            .await
            .unwrap();

        let result = engine.push("todos").await.unwrap();

        assert_eq!(result.resolved, 1);
        let record = engine.store().get("todos", "1").await.unwrap().unwrap();
        assert_eq!(record.fields["text"], "theirs");
        assert!(!record.dirty);
    }

    #[tokio::test]
    async fn merge_resends_merged_fields() {
        let remote = MemoryRemote::new();
        remote.write("todos", "1", fields(json!({"text": "theirs"})));
        let engine = engine(&remote).await.with_policy(ConflictPolicy::resolve_with(|c| {
            let text = |fields: Option<&Fields>| {
                fields
                    .and_then(|f| f.get("text"))
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string()
            };
            let theirs = text(c.remote.as_ref().map(|r| &r.fields));
            let mine = text(c.local.as_ref().map(|r| &r.fields));
            Resolution::Merge(fields(json!({ "text": format!("{theirs} / {mine}") })))
        }));
        engine
            .store()
            .enqueue_insert("todos", "1", fields(json!({"text": "mine"})))
            .await
            .unwrap();

        engine.push("todos").await.unwrap();

        let merged = remote.get("todos", "1").unwrap();
        assert_eq!(merged.fields["text"], "theirs / mine");
        let local = engine.store().get("todos", "1").await.unwrap().unwrap();
        assert_eq!(local.fields, merged.fields);
        assert_eq!(local.version.as_deref(), Some(merged.version.as_str()));
    }

    #[tokio::test]
    async fn deferred_conflict_holds_key_only() {
        let remote = MemoryRemote::new();
        remote.write("todos", "1", fields(json!({"text": "theirs"})));
        let engine = engine(&remote).await
            .with_policy(ConflictPolicy::resolve_with(|_| Resolution::Defer));
        let store = engine.store();
        store
            .enqueue_insert("todos", "1", fields(json!({"text": "mine"})))
            .await
            .unwrap();
        store.dequeue_batch("todos", 10).await.unwrap();
        store.release_in_flight("todos").await.unwrap();
        // Sent once, so this update is queued separately behind the insert
        store
            .enqueue_update("todos", "1", fields(json!({"text": "mine, later"})))
            .await
            .unwrap();

        let result = engine.push("todos").await.unwrap();

        assert_eq!(result.conflicts.len(), 1);
        let ops = store.operations("todos").await.unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].status, OpStatus::Failed);
        assert_eq!(ops[1].status, OpStatus::Pending);
        assert_eq!(remote.pushed().len(), 1);
    }

    #[tokio::test]
    async fn observer_sees_conflicts_and_errors() {
        let remote = MemoryRemote::new();
        remote.write("todos", "1", fields(json!({"text": "theirs"})));
        let events = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&events);
        let engine = engine(&remote).await
            .with_observer(move |event| seen.lock().push(event.clone()));
        engine
            .store()
            .enqueue_insert("todos", "1", fields(json!({"text": "mine"})))
            .await
            .unwrap();

        let _ = engine.push("todos").await;

        let events = events.lock();
        assert!(matches!(events[0], SyncEvent::PushConflict(_)));
        assert!(matches!(events[1], SyncEvent::Error { .. }));
    }

    #[tokio::test]
    async fn cancellation_returns_in_flight_to_pending() {
        let remote = MemoryRemote::new();
        let engine = engine(&remote).await;
        engine
            .store()
            .enqueue_insert("todos", "1", fields(json!({"text": "milk"})))
            .await
            .unwrap();
        let handle = engine.cancel_handle();
        handle.cancel();

        let err = engine.push("todos").await.unwrap_err();

        assert_eq!(err, Error::Cancelled);
        assert!(remote.pushed().is_empty());
        handle.reset();
        assert_eq!(engine.push("todos").await.unwrap().acknowledged, vec![1]);
    }

    #[tokio::test]
    async fn pull_pages_until_end() {
        let remote = MemoryRemote::new();
        for i in 0..5 {
            remote.write("todos", &i.to_string(), fields(json!({"text": "x"})));
        }
        let engine = engine(&remote).await
            .with_config(&SyncConfig::new().with_pull_page_size(2));

        let result = engine.pull("todos", "all", &Predicate::All).await.unwrap();

        assert_eq!(result.pages, 3);
        assert_eq!(result.inserted, 5);
        assert_eq!(result.cursor, 5);
        assert_eq!(engine.store().cursor("todos", "all").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn sync_retries_transport_failures() {
        let remote = MemoryRemote::new();
        let engine = engine(&remote).await.with_config(
            &SyncConfig::new().with_retry(RetryPolicy::fixed(2, std::time::Duration::ZERO)),
        );
        engine
            .store()
            .enqueue_insert("todos", "1", fields(json!({"text": "milk"})))
            .await
            .unwrap();
        remote.fail_next_pull("timeout");

        let result = engine.sync("todos", "all", &Predicate::All).await.unwrap();

        assert!(result.push.acknowledged.is_empty());
        assert_eq!(remote.live("todos").len(), 1);
        assert_eq!(result.pull.unchanged, 1);
    }

    #[tokio::test]
    async fn connect_requires_endpoint() {
        let store = Arc::new(LocalStore::open_in_memory(schema()).await.unwrap());

        let err = SyncEngine::connect(Arc::clone(&store), &SyncConfig::new()).await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ferry_engine::ErrorKind::Configuration);

        let err = SyncEngine::connect(store, &SyncConfig::new().with_endpoint("::nope")).await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ferry_engine::ErrorKind::Configuration);
    }
}
