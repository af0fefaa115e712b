//! Durable local store backed by SQLite.
//!
//! The full state lives in memory as a [`Replica`]; SQLite holds the durable
//! copy. Every write changes the replica, then persists the records and queue
//! entries it touched in one transaction before returning. If the commit fails
//! the replica is rolled back, so readers never see a write that is not on disk.
//!
//! Records and operations are stored as JSON documents, one row each. The
//! next sequence number and the node id live in `meta`, so sequence numbers
//! are never reused across restarts.

use crate::error::{corrupt, storage, Result};
use crate::now;
use ferry_engine::{
    ChangeMarker, Checkpoint, CollectionSchema, Cursors, Enqueued, Error, Failure, Fields,
    NodeId, OpStatus, Operation, OperationQueue, Predicate, PullPage, QueryCursor,
    ReconcileResult, Reconciler, Record, RemoteRecord, Replica, Schema, Seq, VersionToken,
};
use serde::Serialize;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Row, Sqlite, Transaction};
use std::path::Path;
use std::str::FromStr;
use tokio::sync::Mutex;

const SCHEMA_SQL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS records (
        collection TEXT NOT NULL,
        key TEXT NOT NULL,
        body TEXT NOT NULL,
        PRIMARY KEY (collection, key)
    )",
    "CREATE TABLE IF NOT EXISTS operations (
        seq INTEGER PRIMARY KEY,
        collection TEXT NOT NULL,
        key TEXT NOT NULL,
        body TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS operations_by_key ON operations (collection, key)",
    "CREATE TABLE IF NOT EXISTS cursors (
        collection TEXT NOT NULL,
        query TEXT NOT NULL,
        marker INTEGER NOT NULL,
        PRIMARY KEY (collection, query)
    )",
    "CREATE TABLE IF NOT EXISTS meta (
        name TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )",
];

/// A record key within a collection.
type KeyRef = (String, String);

/// What a write changed, beyond the listed record keys.
#[derive(Default)]
struct Touched {
    keys: Vec<KeyRef>,
    cursor: Option<(String, String)>,
}

impl Touched {
    fn key(collection: &str, key: &str) -> Self {
        Self {
            keys: vec![(collection.to_string(), key.to_string())],
            cursor: None,
        }
    }

    fn keys<'a>(collection: &str, keys: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            keys: keys
                .into_iter()
                .map(|key| (collection.to_string(), key.to_string()))
                .collect(),
            cursor: None,
        }
    }

    fn ops(ops: &[Operation]) -> Self {
        Self {
            keys: ops
                .iter()
                .map(|op| (op.collection.clone(), op.key.clone()))
                .collect(),
            cursor: None,
        }
    }
}

/// File-backed record storage plus the operation queue.
pub struct LocalStore {
    pool: SqlitePool,
    replica: Mutex<Replica>,
    node_id: NodeId,
}

impl LocalStore {
    /// Open or create a store file.
    ///
    /// A file SQLite cannot open, or rows that no longer decode, are reported
    /// as storage errors. The file is never reset.
    pub async fn open(path: impl AsRef<Path>, schema: Schema) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(storage)?;

        tracing::debug!(path = %path.as_ref().display(), "opened local store");
        Self::load(pool, schema).await
    }

    /// Open a store that lives only as long as this value. Used by tests.
    pub async fn open_in_memory(schema: Schema) -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(storage)?;

        // The database vanishes with its last connection, so keep exactly one open
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(storage)?;

        Self::load(pool, schema).await
    }

    async fn load(pool: SqlitePool, schema: Schema) -> Result<Self> {
        for statement in SCHEMA_SQL {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(storage)?;
        }

        let node_id = match read_meta(&pool, "node_id").await? {
            Some(node_id) => node_id,
            None => {
                let node_id = uuid::Uuid::new_v4().to_string();
                write_meta(&pool, "node_id", &node_id).await?;
                node_id
            }
        };
        let next_seq = match read_meta(&pool, "next_seq").await? {
            Some(value) => value
                .parse::<Seq>()
                .map_err(|e| Error::Storage(format!("corrupt next_seq: {e}")))?,
            None => 1,
        };

        let records = sqlx::query("SELECT body FROM records")
            .fetch_all(&pool)
            .await
            .map_err(storage)?
            .into_iter()
            .map(|row| decode::<Record>("record", &row))
            .collect::<Result<Vec<_>>>()?;

        let ops = sqlx::query("SELECT body FROM operations ORDER BY seq")
            .fetch_all(&pool)
            .await
            .map_err(storage)?
            .into_iter()
            .map(|row| decode::<Operation>("operation", &row))
            .collect::<Result<Vec<_>>>()?;

        let cursors = sqlx::query("SELECT collection, query, marker FROM cursors")
            .fetch_all(&pool)
            .await
            .map_err(storage)?
            .into_iter()
            .map(|row| {
                Ok(QueryCursor {
                    collection: row.try_get("collection").map_err(storage)?,
                    query: row.try_get("query").map_err(storage)?,
                    marker: row.try_get::<i64, _>("marker").map_err(storage)? as ChangeMarker,
                })
            })
            .collect::<Result<Cursors>>()?;

        let recovered = ops
            .iter()
            .filter(|op| op.status == OpStatus::InFlight)
            .count();
        if recovered > 0 {
            tracing::info!(recovered, "returning interrupted operations to pending");
        }
        tracing::debug!(
            node_id = %node_id,
            records = records.len(),
            operations = ops.len(),
            next_seq,
            "loaded local store"
        );

        let queue = OperationQueue::restore(node_id.clone(), ops, next_seq);
        Ok(Self {
            pool,
            replica: Mutex::new(Replica::restore(schema, records, queue, cursors)),
            node_id,
        })
    }

    /// Persistent random id of this store; prefixes operation ids.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Register a collection schema. Unregistered collections cannot be used.
    pub async fn register(&self, collection: CollectionSchema) {
        tracing::debug!(collection = %collection.name, "registered collection");
        self.replica.lock().await.register(collection);
    }

    /// Bound the number of retained operations; `None` for unbounded.
    pub async fn set_queue_capacity(&self, capacity: Option<usize>) {
        self.replica.lock().await.queue_mut().set_capacity(capacity);
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Get a live record.
    pub async fn get(&self, collection: &str, key: &str) -> Result<Option<Record>> {
        Ok(self.replica.lock().await.get(collection, key)?.cloned())
    }

    /// Get a record, tombstones included.
    pub async fn record(&self, collection: &str, key: &str) -> Result<Option<Record>> {
        Ok(self.replica.lock().await.record(collection, key)?.cloned())
    }

    /// Live records matching a predicate, ordered by key.
    pub async fn query(&self, collection: &str, predicate: &Predicate) -> Result<Vec<Record>> {
        Ok(self
            .replica
            .lock()
            .await
            .query(collection, predicate)?
            .into_iter()
            .cloned()
            .collect())
    }

    /// Every queued operation of a collection, in push order.
    pub async fn operations(&self, collection: &str) -> Result<Vec<Operation>> {
        let replica = self.replica.lock().await;
        replica.schema().require(collection)?;
        Ok(replica
            .queue()
            .iter()
            .filter(|op| op.collection == collection)
            .cloned()
            .collect())
    }

    /// Number of operations of a collection not yet acknowledged.
    pub async fn pending_count(&self, collection: &str) -> Result<usize> {
        Ok(self.operations(collection).await?.len())
    }

    /// Failed operations of a collection.
    pub async fn failed(&self, collection: &str) -> Result<Vec<Operation>> {
        Ok(self
            .operations(collection)
            .await?
            .into_iter()
            .filter(|op| op.is_failed())
            .collect())
    }

    pub async fn cursor(&self, collection: &str, query: &str) -> Result<ChangeMarker> {
        self.replica.lock().await.cursor(collection, query)
    }

    // ------------------------------------------------------------------
    // Raw record writes (no queueing)
    // ------------------------------------------------------------------

    /// Store a record as is.
    pub async fn put(&self, record: Record) -> Result<()> {
        let touched = Touched::key(&record.collection, &record.key);
        self.write(touched, move |replica| replica.put(record)).await
    }

    /// Tombstone a record.
    pub async fn delete(&self, collection: &str, key: &str) -> Result<()> {
        let timestamp = now();
        self.write(Touched::key(collection, key), |replica| {
            replica.tombstone(collection, key, timestamp)
        })
        .await
    }

    /// Remove a record entirely.
    pub async fn purge(&self, collection: &str, key: &str) -> Result<Option<Record>> {
        self.write(Touched::key(collection, key), |replica| {
            replica.purge(collection, key)
        })
        .await
    }

    // ------------------------------------------------------------------
    // Mutations (record change + queued operation, one transaction)
    // ------------------------------------------------------------------

    /// Create a record and queue its insert.
    pub async fn enqueue_insert(
        &self,
        collection: &str,
        key: &str,
        fields: Fields,
    ) -> Result<Enqueued> {
        let timestamp = now();
        let enqueued = self
            .write(Touched::key(collection, key), |replica| {
                replica.insert(collection, key, fields, timestamp)
            })
            .await?;
        tracing::debug!(collection, key, seq = enqueued.seq(), "queued insert");
        Ok(enqueued)
    }

    /// Replace a record's fields and queue the update.
    pub async fn enqueue_update(
        &self,
        collection: &str,
        key: &str,
        fields: Fields,
    ) -> Result<Enqueued> {
        let timestamp = now();
        let enqueued = self
            .write(Touched::key(collection, key), |replica| {
                replica.update(collection, key, fields, timestamp)
            })
            .await?;
        tracing::debug!(collection, key, seq = enqueued.seq(), "queued update");
        Ok(enqueued)
    }

    /// Tombstone a record and queue its delete.
    pub async fn enqueue_delete(&self, collection: &str, key: &str) -> Result<Enqueued> {
        let timestamp = now();
        let enqueued = self
            .write(Touched::key(collection, key), |replica| {
                replica.delete(collection, key, timestamp)
            })
            .await?;
        tracing::debug!(collection, key, ?enqueued, "queued delete");
        Ok(enqueued)
    }

    // ------------------------------------------------------------------
    // Queue transitions used by the sync engine
    // ------------------------------------------------------------------

    /// Hand out the next batch of a collection's operations, marked in flight.
    ///
    /// The raised attempt counts are durable before anything is sent.
    pub async fn dequeue_batch(&self, collection: &str, max: usize) -> Result<Vec<Operation>> {
        let mut replica = self.replica.lock().await;
        replica.schema().require(collection)?;
        let checkpoint = replica.checkpoint(std::iter::empty());

        let batch = replica.queue_mut().dequeue_collection(collection, max);
        self.commit(&mut replica, checkpoint, &Touched::ops(&batch)).await?;
        Ok(batch)
    }

    /// Apply the remote's acceptance of an operation.
    pub async fn acknowledge(&self, op: &Operation, version: VersionToken) -> Result<Operation> {
        let seq = op.seq;
        self.write(Touched::key(&op.collection, &op.key), move |replica| {
            replica.acknowledge(seq, version)
        })
        .await
    }

    /// Mark an in-flight operation as failed.
    pub async fn fail(&self, op: &Operation, failure: Failure) -> Result<()> {
        let seq = op.seq;
        self.write(Touched::key(&op.collection, &op.key), move |replica| {
            replica.fail(seq, failure)
        })
        .await
    }

    /// Return one in-flight operation to pending, unsent.
    pub async fn release(&self, op: &Operation) -> Result<()> {
        let seq = op.seq;
        self.write(Touched::key(&op.collection, &op.key), move |replica| {
            replica.queue_mut().release(seq)
        })
        .await
    }

    /// Return a collection's in-flight operations to pending after an aborted attempt.
    ///
    /// The release stands in memory even if persisting it fails: operations
    /// stored as in flight are loaded back as pending anyway.
    pub async fn release_in_flight(&self, collection: &str) -> Result<Vec<Seq>> {
        let mut replica = self.replica.lock().await;
        let released = replica.queue_mut().release_collection(collection);
        if released.is_empty() {
            return Ok(released);
        }
        tracing::debug!(collection, count = released.len(), "released in-flight operations");

        let ops: Vec<Operation> = released
            .iter()
            .filter_map(|seq| replica.queue().get(*seq).cloned())
            .collect();
        self.persist(&replica, &Touched::ops(&ops)).await?;
        Ok(released)
    }

    /// Put a failed operation back in line unchanged.
    pub async fn retry(&self, seq: Seq) -> Result<()> {
        self.with_op(seq, |replica| replica.queue_mut().retry(seq)).await
    }

    /// Rebase a failed operation onto a new base version and put it back in line.
    pub async fn rebase(
        &self,
        seq: Seq,
        base_version: Option<VersionToken>,
        fields: Option<Fields>,
    ) -> Result<()> {
        let timestamp = now();
        self.with_op(seq, move |replica| {
            let (collection, key) = op_key(replica, seq)?;
            if let Some(fields) = &fields {
                if let Some(mut record) = replica.get(&collection, &key)?.cloned() {
                    record.update_fields(fields.clone(), timestamp);
                    replica.put(record)?;
                }
            }
            replica.queue_mut().rebase(seq, base_version, fields)
        })
        .await
    }

    /// Drop a failed operation for good.
    ///
    /// The local record keeps its edits; it stays dirty until pulled over or
    /// edited again.
    pub async fn discard(&self, seq: Seq) -> Result<Operation> {
        self.with_op(seq, |replica| replica.queue_mut().discard(seq)).await
    }

    /// Drop a failed operation and adopt the remote's record in its place.
    ///
    /// `remote` is `None` when the record no longer exists remotely.
    pub async fn discard_for_remote(
        &self,
        seq: Seq,
        remote: Option<&RemoteRecord>,
    ) -> Result<Operation> {
        let timestamp = now();
        self.with_op(seq, move |replica| {
            let op = replica.queue_mut().discard(seq)?;
            let settled = !replica.queue().has_queued_for(&op.collection, &op.key);
            match remote {
                Some(remote) if settled => {
                    replica.adopt_remote(&op.collection, remote, timestamp)?
                }
                None if settled => {
                    replica.purge(&op.collection, &op.key)?;
                }
                _ => {}
            }
            Ok(op)
        })
        .await
    }

    /// Adopt the remote version a pull staged on a record. Returns whether one was staged.
    pub async fn accept_staged(&self, collection: &str, key: &str) -> Result<bool> {
        let timestamp = now();
        self.write(Touched::key(collection, key), |replica| {
            replica.accept_staged(collection, key, timestamp)
        })
        .await
    }

    /// Merge a page of remote changes and advance the query cursor, atomically.
    pub async fn merge_page(
        &self,
        collection: &str,
        query: &str,
        page: &PullPage,
    ) -> Result<ReconcileResult> {
        let timestamp = now();
        let mut touched = Touched::keys(collection, page.records.iter().map(|r| r.key.as_str()));
        touched.cursor = Some((collection.to_string(), query.to_string()));

        self.write(touched, |replica| {
            Reconciler::new(replica, collection, timestamp).merge_page(query, page)
        })
        .await
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    async fn with_op<T, F>(&self, seq: Seq, f: F) -> Result<T>
    where
        F: FnOnce(&mut Replica) -> ferry_engine::Result<T>,
    {
        let mut replica = self.replica.lock().await;
        let (collection, key) = op_key(&replica, seq)?;
        let touched = Touched::key(&collection, &key);
        self.apply(&mut replica, touched, f).await
    }

    async fn write<T, F>(&self, touched: Touched, f: F) -> Result<T>
    where
        F: FnOnce(&mut Replica) -> ferry_engine::Result<T>,
    {
        let mut replica = self.replica.lock().await;
        self.apply(&mut replica, touched, f).await
    }

    async fn apply<T, F>(&self, replica: &mut Replica, touched: Touched, f: F) -> Result<T>
    where
        F: FnOnce(&mut Replica) -> ferry_engine::Result<T>,
    {
        let checkpoint = replica.checkpoint(
            touched
                .keys
                .iter()
                .map(|(collection, key)| (collection.as_str(), key.as_str())),
        );
        let value = match f(replica) {
            Ok(value) => value,
            Err(err) => {
                replica.rollback(checkpoint);
                return Err(err);
            }
        };
        self.commit(replica, checkpoint, &touched).await?;
        Ok(value)
    }

    /// Persist what changed, or undo it in memory if the commit fails.
    ///
    /// The undo also runs when the caller stops polling before the commit
    /// completes.
    async fn commit(
        &self,
        replica: &mut Replica,
        checkpoint: Checkpoint,
        touched: &Touched,
    ) -> Result<()> {
        let pending = Uncommitted {
            replica,
            checkpoint: Some(checkpoint),
        };
        match self.persist(pending.replica, touched).await {
            Ok(()) => {
                pending.keep();
                Ok(())
            }
            Err(err) => {
                tracing::error!(error = %err, "persisting local write failed; rolling back");
                Err(err)
            }
        }
    }

    async fn persist(&self, replica: &Replica, touched: &Touched) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        for (collection, key) in &touched.keys {
            match replica.record(collection, key)? {
                Some(record) => {
                    sqlx::query(
                        "INSERT INTO records (collection, key, body) VALUES (?, ?, ?)
                         ON CONFLICT (collection, key) DO UPDATE SET body = excluded.body",
                    )
                    .bind(collection)
                    .bind(key)
                    .bind(encode("record", record)?)
                    .execute(&mut *tx)
                    .await
                    .map_err(storage)?;
                }
                None => {
                    sqlx::query("DELETE FROM records WHERE collection = ? AND key = ?")
                        .bind(collection)
                        .bind(key)
                        .execute(&mut *tx)
                        .await
                        .map_err(storage)?;
                }
            }
            write_ops(&mut tx, collection, key, &replica.ops_for(collection, key)).await?;
        }

        if let Some((collection, query)) = &touched.cursor {
            let marker = replica.cursors().get(collection, query);
            sqlx::query(
                "INSERT INTO cursors (collection, query, marker) VALUES (?, ?, ?)
                 ON CONFLICT (collection, query) DO UPDATE SET marker = excluded.marker",
            )
            .bind(collection)
            .bind(query)
            .bind(marker as i64)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        }

        sqlx::query(
            "INSERT INTO meta (name, value) VALUES ('next_seq', ?)
             ON CONFLICT (name) DO UPDATE SET value = excluded.value",
        )
        .bind(replica.queue().next_seq().to_string())
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        tx.commit().await.map_err(storage)
    }
}

/// A replica change that is rolled back on drop unless kept.
struct Uncommitted<'a> {
    replica: &'a mut Replica,
    checkpoint: Option<Checkpoint>,
}

impl Uncommitted<'_> {
    fn keep(mut self) {
        self.checkpoint = None;
    }
}

impl Drop for Uncommitted<'_> {
    fn drop(&mut self) {
        if let Some(checkpoint) = self.checkpoint.take() {
            self.replica.rollback(checkpoint);
        }
    }
}

fn op_key(replica: &Replica, seq: Seq) -> ferry_engine::Result<KeyRef> {
    replica
        .queue()
        .get(seq)
        .map(|op| (op.collection.clone(), op.key.clone()))
        .ok_or(Error::OperationNotFound(seq))
}

async fn write_ops(
    tx: &mut Transaction<'_, Sqlite>,
    collection: &str,
    key: &str,
    ops: &[Operation],
) -> Result<()> {
    sqlx::query("DELETE FROM operations WHERE collection = ? AND key = ?")
        .bind(collection)
        .bind(key)
        .execute(&mut **tx)
        .await
        .map_err(storage)?;

    for op in ops {
        sqlx::query("INSERT INTO operations (seq, collection, key, body) VALUES (?, ?, ?, ?)")
            .bind(op.seq as i64)
            .bind(collection)
            .bind(key)
            .bind(encode("operation", op)?)
            .execute(&mut **tx)
            .await
            .map_err(storage)?;
    }
    Ok(())
}

async fn read_meta(pool: &SqlitePool, name: &str) -> Result<Option<String>> {
    let row = sqlx::query("SELECT value FROM meta WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await
        .map_err(storage)?;
    row.map(|row| row.try_get("value").map_err(storage))
        .transpose()
}

async fn write_meta(pool: &SqlitePool, name: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO meta (name, value) VALUES (?, ?)
         ON CONFLICT (name) DO UPDATE SET value = excluded.value",
    )
    .bind(name)
    .bind(value)
    .execute(pool)
    .await
    .map_err(storage)?;
    Ok(())
}

fn encode<T: Serialize>(what: &str, value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::Storage(format!("cannot encode {what}: {e}")))
}

fn decode<T: serde::de::DeserializeOwned>(what: &str, row: &sqlx::sqlite::SqliteRow) -> Result<T> {
    let body: String = row.try_get("body").map_err(storage)?;
    serde_json::from_str(&body).map_err(|e| corrupt(what, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_engine::{FieldDef, FieldType, OpKind};
    use serde_json::json;
    use tempfile::tempdir;

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

    #[tokio::test]
    async fn insert_is_visible_and_queued() {
        let store = LocalStore::open_in_memory(schema()).await.unwrap();

        store
            .enqueue_insert("todos", "1", fields(json!({"text": "milk"})))
            .await
            .unwrap();

        let record = store.get("todos", "1").await.unwrap().unwrap();
        assert!(record.dirty);
        assert_eq!(store.pending_count("todos").await.unwrap(), 1);
        let ops = store.operations("todos").await.unwrap();
        assert_eq!(ops[0].op_id, format!("{}:1", store.node_id()));
    }

    #[tokio::test]
    async fn unregistered_collection_is_a_configuration_error() {
        let store = LocalStore::open_in_memory(schema()).await.unwrap();

        let err = store
            .enqueue_insert("notes", "1", Fields::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ferry_engine::ErrorKind::Configuration);

        store.register(CollectionSchema::untyped("notes")).await;
        assert!(store.enqueue_insert("notes", "1", Fields::new()).await.is_ok());
    }

    #[tokio::test]
    async fn raw_writes_do_not_queue() {
        let store = LocalStore::open_in_memory(schema()).await.unwrap();
        let record = Record::new("1", "todos", fields(json!({"text": "milk"})), 1000);

        store.put(record).await.unwrap();
        store.delete("todos", "1").await.unwrap();

        assert!(store.get("todos", "1").await.unwrap().is_none());
        assert!(store.record("todos", "1").await.unwrap().unwrap().deleted);
        assert_eq!(store.pending_count("todos").await.unwrap(), 0);

        store.purge("todos", "1").await.unwrap();
        assert!(store.record("todos", "1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn full_queue_rejects_without_side_effects() {
        let store = LocalStore::open_in_memory(schema()).await.unwrap();
        store.set_queue_capacity(Some(1)).await;
        store
            .enqueue_insert("todos", "1", fields(json!({"text": "milk"})))
            .await
            .unwrap();

        let err = store
            .enqueue_insert("todos", "2", fields(json!({"text": "eggs"})))
            .await
            .unwrap_err();

        assert_eq!(err, Error::FullQueue { capacity: 1 });
        assert!(store.record("todos", "2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ferry.db");

        let node_id = {
            let store = LocalStore::open(&path, schema()).await.unwrap();
            store
                .enqueue_insert("todos", "1", fields(json!({"text": "milk"})))
                .await
                .unwrap();
            store
                .enqueue_insert("todos", "2", fields(json!({"text": "eggs"})))
                .await
                .unwrap();
            store.enqueue_delete("todos", "2").await.unwrap();
            store
                .merge_page("todos", "all", &PullPage {
                    records: vec![],
                    next_cursor: 7,
                    end: true,
                })
                .await
                .unwrap();
            store.node_id().clone()
        };

        let store = LocalStore::open(&path, schema()).await.unwrap();
        assert_eq!(store.node_id(), &node_id);
        assert!(store.get("todos", "1").await.unwrap().is_some());
        assert!(store.record("todos", "2").await.unwrap().is_none());
        let ops = store.operations("todos").await.unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind, OpKind::Insert);
        assert_eq!(store.cursor("todos", "all").await.unwrap(), 7);

        // Sequence numbers continue after the cancelled pair
        let next = store
            .enqueue_insert("todos", "3", fields(json!({"text": "bread"})))
            .await
            .unwrap();
        assert_eq!(next.seq(), 3);
    }

    #[tokio::test]
    async fn in_flight_operations_recover_as_sent_pending() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ferry.db");

        {
            let store = LocalStore::open(&path, schema()).await.unwrap();
            store
                .enqueue_insert("todos", "1", fields(json!({"text": "milk"})))
                .await
                .unwrap();
            let batch = store.dequeue_batch("todos", 10).await.unwrap();
            assert_eq!(batch.len(), 1);
        }

        let store = LocalStore::open(&path, schema()).await.unwrap();
        let ops = store.operations("todos").await.unwrap();
        assert_eq!(ops[0].status, OpStatus::Pending);
        assert!(ops[0].was_sent());

        // A sent insert is not rewritten by a later update
        store
            .enqueue_update("todos", "1", fields(json!({"text": "oat milk"})))
            .await
            .unwrap();
        assert_eq!(store.pending_count("todos").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn abandoned_write_is_rolled_back() {
        use sqlx::{Connection, SqliteConnection};
        use std::time::Duration;

        let dir = tempdir().unwrap();
        let path = dir.path().join("todos.db");
        let store = LocalStore::open(&path, schema()).await.unwrap();

        // Hold the write lock so the commit cannot finish
        let options = SqliteConnectOptions::new().filename(&path);
        let mut blocker = SqliteConnection::connect_with(&options).await.unwrap();
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut blocker)
            .await
            .unwrap();

        let write = store.enqueue_insert("todos", "1", fields(json!({"text": "milk"})));
        let timed_out = tokio::time::timeout(Duration::from_millis(100), write).await;
        assert!(timed_out.is_err());

        assert!(store.get("todos", "1").await.unwrap().is_none());
        assert_eq!(store.pending_count("todos").await.unwrap(), 0);

        sqlx::query("COMMIT").execute(&mut blocker).await.unwrap();
        blocker.close().await.unwrap();

        store
            .enqueue_insert("todos", "2", fields(json!({"text": "eggs"})))
            .await
            .unwrap();
        drop(store);

        let reopened = LocalStore::open(&path, schema()).await.unwrap();
        assert!(reopened.get("todos", "1").await.unwrap().is_none());
        let ops = reopened.operations("todos").await.unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].key, "2");
    }

    #[tokio::test]
    async fn corrupt_rows_are_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ferry.db");
        {
            let store = LocalStore::open(&path, schema()).await.unwrap();
            sqlx::query("INSERT INTO records (collection, key, body) VALUES ('todos', 'x', '{')")
                .execute(&store.pool)
                .await
                .unwrap();
        }

        let err = LocalStore::open(&path, schema()).await.err().unwrap();

        assert_eq!(err.kind(), ferry_engine::ErrorKind::Storage);
    }

    #[tokio::test]
    async fn unreadable_file_is_a_storage_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("not-a-db");
        let garbage = b"definitely not sqlite, just some bytes that fill a header";
        std::fs::write(&path, garbage).unwrap();

        let err = LocalStore::open(&path, schema()).await.err().unwrap();

        assert_eq!(err.kind(), ferry_engine::ErrorKind::Storage);
    }

    #[tokio::test]
    async fn acknowledge_and_failure_are_durable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ferry.db");
        {
            let store = LocalStore::open(&path, schema()).await.unwrap();
            store
                .enqueue_insert("todos", "1", fields(json!({"text": "milk"})))
                .await
                .unwrap();
            store
                .enqueue_insert("todos", "2", fields(json!({"text": "eggs"})))
                .await
                .unwrap();
            let batch = store.dequeue_batch("todos", 10).await.unwrap();
            store.acknowledge(&batch[0], "v1".into()).await.unwrap();
            store
                .fail(&batch[1], Failure::new("version mismatch"))
                .await
                .unwrap();
        }

        let store = LocalStore::open(&path, schema()).await.unwrap();
        let record = store.get("todos", "1").await.unwrap().unwrap();
        assert_eq!(record.version.as_deref(), Some("v1"));
        assert!(!record.dirty);
        let failed = store.failed("todos").await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].key, "2");

        store.retry(failed[0].seq).await.unwrap();
        assert!(store.failed("todos").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn discard_for_remote_adopts_remote_record() {
        let store = LocalStore::open_in_memory(schema()).await.unwrap();
        store
            .enqueue_insert("todos", "1", fields(json!({"text": "mine"})))
            .await
            .unwrap();
        let batch = store.dequeue_batch("todos", 10).await.unwrap();
        store.fail(&batch[0], Failure::new("conflict")).await.unwrap();

        let remote = RemoteRecord {
            key: "1".into(),
            fields: fields(json!({"text": "theirs"})),
            version: "v3".into(),
            deleted: false,
            marker: 3,
        };
        store
            .discard_for_remote(batch[0].seq, Some(&remote))
            .await
            .unwrap();

        let record = store.get("todos", "1").await.unwrap().unwrap();
        assert_eq!(record.get("text"), Some(&json!("theirs")));
        assert!(!record.dirty);
        assert_eq!(store.pending_count("todos").await.unwrap(), 0);
    }
}
