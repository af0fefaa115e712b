//! Local replica state: records, the operation queue and pull cursors.
//!
//! Every local mutation updates a record and appends to the queue in one step,
//! so the two never disagree. The replica has no IO; callers persist the keys
//! a mutation touched and roll back to a [`Checkpoint`] if that fails.

use crate::{
    cursor::Cursors,
    error::Result,
    operation::{Failure, OpKind, Operation},
    query::Predicate,
    queue::{Enqueued, OperationQueue},
    record::Fields,
    remote::RemoteRecord,
    schema::{CollectionSchema, Schema},
    ChangeMarker, CollectionName, Error, NodeId, Record, RecordKey, Seq, Timestamp, VersionToken,
};
use std::collections::BTreeMap;

/// Records of one collection, ordered by key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordSet {
    records: BTreeMap<RecordKey, Record>,
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Record> {
        self.records.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Record> {
        self.records.get_mut(key)
    }

    pub fn insert(&mut self, record: Record) {
        self.records.insert(record.key.clone(), record);
    }

    pub fn remove(&mut self, key: &str) -> Option<Record> {
        self.records.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    /// Iterate over live records (not tombstoned).
    pub fn active_records(&self) -> impl Iterator<Item = &Record> {
        self.records.values().filter(|r| r.is_active())
    }

    /// Iterate over all records, tombstones included.
    pub fn all_records(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.active_records().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Saved state of some records plus the queue and cursors.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    records: Vec<(CollectionName, RecordKey, Option<Record>)>,
    queue: OperationQueue,
    cursors: Cursors,
}

/// The complete local state of a store.
#[derive(Debug, Clone)]
pub struct Replica {
    schema: Schema,
    collections: BTreeMap<CollectionName, RecordSet>,
    queue: OperationQueue,
    cursors: Cursors,
}

impl Replica {
    /// Create an empty replica.
    pub fn new(schema: Schema, node_id: impl Into<NodeId>) -> Self {
        Self {
            schema,
            collections: BTreeMap::new(),
            queue: OperationQueue::new(node_id),
            cursors: Cursors::new(),
        }
    }

    /// Rebuild a replica from persisted parts.
    pub fn restore(
        schema: Schema,
        records: impl IntoIterator<Item = Record>,
        queue: OperationQueue,
        cursors: Cursors,
    ) -> Self {
        let mut collections: BTreeMap<CollectionName, RecordSet> = BTreeMap::new();
        for record in records {
            collections
                .entry(record.collection.clone())
                .or_default()
                .insert(record);
        }
        Self {
            schema,
            collections,
            queue,
            cursors,
        }
    }

    /// Register a collection schema.
    pub fn register(&mut self, collection: CollectionSchema) {
        self.schema.add_collection(collection);
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn node_id(&self) -> &NodeId {
        self.queue.node_id()
    }

    pub fn queue(&self) -> &OperationQueue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut OperationQueue {
        &mut self.queue
    }

    pub fn cursors(&self) -> &Cursors {
        &self.cursors
    }

    /// Cursor of a named query; zero if never pulled.
    pub fn cursor(&self, collection: &str, query: &str) -> Result<ChangeMarker> {
        self.schema.require(collection)?;
        Ok(self.cursors.get(collection, query))
    }

    /// Move a cursor forward; it never regresses.
    pub fn advance_cursor(
        &mut self,
        collection: &str,
        query: &str,
        marker: ChangeMarker,
    ) -> Result<bool> {
        self.schema.require(collection)?;
        Ok(self.cursors.advance(collection, query, marker))
    }

    /// Get a live record.
    pub fn get(&self, collection: &str, key: &str) -> Result<Option<&Record>> {
        Ok(self.record(collection, key)?.filter(|r| r.is_active()))
    }

    /// Get a record including tombstones.
    pub fn record(&self, collection: &str, key: &str) -> Result<Option<&Record>> {
        self.schema.require(collection)?;
        Ok(self.collections.get(collection).and_then(|c| c.get(key)))
    }

    /// Live records matching a predicate, ordered by key.
    pub fn query(&self, collection: &str, predicate: &Predicate) -> Result<Vec<&Record>> {
        self.schema.require(collection)?;
        Ok(self
            .collections
            .get(collection)
            .map(|set| {
                set.active_records()
                    .filter(|r| predicate.matches(&r.fields))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Every stored record, tombstones included.
    pub fn all_records(&self) -> impl Iterator<Item = &Record> {
        self.collections.values().flat_map(|set| set.all_records())
    }

    /// Store a record as is, without queueing anything.
    pub fn put(&mut self, record: Record) -> Result<()> {
        self.schema.require(&record.collection)?;
        self.collections
            .entry(record.collection.clone())
            .or_default()
            .insert(record);
        Ok(())
    }

    /// Tombstone a record without queueing anything.
    pub fn tombstone(&mut self, collection: &str, key: &str, timestamp: Timestamp) -> Result<()> {
        let record = self
            .record_mut(collection, key)?
            .ok_or_else(|| Error::RecordNotFound(key.to_string()))?;
        record.mark_deleted(timestamp);
        Ok(())
    }

    /// Remove a record entirely.
    pub fn purge(&mut self, collection: &str, key: &str) -> Result<Option<Record>> {
        self.schema.require(collection)?;
        Ok(self
            .collections
            .get_mut(collection)
            .and_then(|set| set.remove(key)))
    }

    /// Create a record and queue its insert.
    pub fn insert(
        &mut self,
        collection: &str,
        key: &str,
        fields: Fields,
        timestamp: Timestamp,
    ) -> Result<Enqueued> {
        self.schema.require(collection)?.validate_fields(&fields)?;
        if self.record(collection, key)?.is_some() {
            return Err(Error::RecordAlreadyExists(key.to_string()));
        }

        let enqueued = self
            .queue
            .enqueue(Operation::insert(collection, key, fields.clone(), timestamp))?;
        self.put(Record::new(key, collection, fields, timestamp))?;
        Ok(enqueued)
    }

    /// Replace a record's fields and queue the update.
    pub fn update(
        &mut self,
        collection: &str,
        key: &str,
        fields: Fields,
        timestamp: Timestamp,
    ) -> Result<Enqueued> {
        self.schema.require(collection)?.validate_fields(&fields)?;
        let base_version = self.live_version(collection, key)?;

        let enqueued = self.queue.enqueue(Operation::update(
            collection,
            key,
            fields.clone(),
            base_version,
            timestamp,
        ))?;
        if let Some(record) = self.record_mut(collection, key)? {
            record.update_fields(fields, timestamp);
        }
        Ok(enqueued)
    }

    /// Tombstone a record and queue its delete.
    ///
    /// A record whose insert never left the queue disappears outright.
    pub fn delete(
        &mut self,
        collection: &str,
        key: &str,
        timestamp: Timestamp,
    ) -> Result<Enqueued> {
        let base_version = self.live_version(collection, key)?;

        let enqueued = self
            .queue
            .enqueue(Operation::delete(collection, key, base_version, timestamp))?;
        if matches!(enqueued, Enqueued::Cancelled { .. })
            && !self.queue.has_queued_for(collection, key)
        {
            self.purge(collection, key)?;
        } else {
            self.tombstone(collection, key, timestamp)?;
        }
        Ok(enqueued)
    }

    /// Apply the remote's acceptance of an in-flight operation.
    ///
    /// The record takes the new version token and becomes clean once nothing
    /// else is queued for it; an acknowledged delete purges the tombstone.
    pub fn acknowledge(&mut self, seq: Seq, version: VersionToken) -> Result<Operation> {
        let op = self.queue.mark_acknowledged(seq, Some(version.clone()))?;
        let settled = !self.queue.has_queued_for(&op.collection, &op.key);

        let deleted = match self.record(&op.collection, &op.key)? {
            Some(record) => record.deleted,
            None => return Ok(op),
        };
        if op.kind == OpKind::Delete && deleted && settled {
            self.purge(&op.collection, &op.key)?;
            return Ok(op);
        }
        if let Some(record) = self.record_mut(&op.collection, &op.key)? {
            record.version = Some(version);
            if settled {
                record.dirty = false;
                record.staged = None;
            }
        }
        Ok(op)
    }

    /// Mark an in-flight operation as failed.
    pub fn fail(&mut self, seq: Seq, failure: Failure) -> Result<()> {
        self.queue.mark_failed(seq, failure)
    }

    /// Replace local state of a record with the remote's.
    ///
    /// A remote tombstone purges the record. Queued operations are untouched.
    pub fn adopt_remote(
        &mut self,
        collection: &str,
        remote: &RemoteRecord,
        timestamp: Timestamp,
    ) -> Result<()> {
        if remote.deleted {
            self.purge(collection, &remote.key)?;
            return Ok(());
        }
        match self.record_mut(collection, &remote.key)? {
            Some(record) => record.adopt_remote(remote, timestamp),
            None => self.put(Record::from_remote(collection, remote, timestamp))?,
        }
        Ok(())
    }

    /// Adopt the remote version staged on a record by an earlier pull.
    pub fn accept_staged(
        &mut self,
        collection: &str,
        key: &str,
        timestamp: Timestamp,
    ) -> Result<bool> {
        let staged = self
            .record(collection, key)?
            .and_then(|record| record.staged.clone());
        match staged {
            Some(remote) => {
                self.adopt_remote(collection, &remote, timestamp)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Queued operations for one record, cloned.
    pub fn ops_for(&self, collection: &str, key: &str) -> Vec<Operation> {
        self.queue.for_key(collection, key).cloned().collect()
    }

    /// Save the given records plus the queue and cursors.
    pub fn checkpoint<'a, I>(&self, keys: I) -> Checkpoint
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let records = keys
            .into_iter()
            .map(|(collection, key)| {
                let record = self
                    .collections
                    .get(collection)
                    .and_then(|set| set.get(key))
                    .cloned();
                (collection.to_string(), key.to_string(), record)
            })
            .collect();
        Checkpoint {
            records,
            queue: self.queue.clone(),
            cursors: self.cursors.clone(),
        }
    }

    /// Restore the state saved by [`Replica::checkpoint`].
    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        for (collection, key, record) in checkpoint.records {
            let set = self.collections.entry(collection).or_default();
            match record {
                Some(record) => set.insert(record),
                None => {
                    set.remove(&key);
                }
            }
        }
        self.queue = checkpoint.queue;
        self.cursors = checkpoint.cursors;
    }

    pub(crate) fn record_mut(
        &mut self,
        collection: &str,
        key: &str,
    ) -> Result<Option<&mut Record>> {
        self.schema.require(collection)?;
        Ok(self
            .collections
            .get_mut(collection)
            .and_then(|set| set.get_mut(key)))
    }

    fn live_version(&self, collection: &str, key: &str) -> Result<Option<VersionToken>> {
        match self.record(collection, key)? {
            None => Err(Error::RecordNotFound(key.to_string())),
            Some(record) if record.deleted => Err(Error::OperationOnDeleted(key.to_string())),
            Some(record) => Ok(record.version.clone()),
        }
    }
}
