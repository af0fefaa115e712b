//! Operation queue - the ordered log of local mutations awaiting push.
//!
//! # Ordering
//!
//! Sequence numbers are allocated from a counter that only moves forward, so
//! they are strictly increasing and never reused, even after operations are
//! acknowledged and removed. Push order is sequence order.
//!
//! # Coalescing
//!
//! A new operation on a key whose latest queued operation is still Pending and
//! has never been sent is folded into it where possible:
//!
//! | queued | new    | effect                                  |
//! |--------|--------|-----------------------------------------|
//! | Insert | Update | fields folded into the insert           |
//! | Update | Update | fields replace the earlier update       |
//! | Insert | Delete | both removed                            |
//! | Update | Delete | update dropped, one delete appended     |
//! | Delete | Delete | no-op                                   |
//! | Delete | Update | rejected                                |
//!
//! Operations that may already have reached the remote are never rewritten;
//! the remote recognizes them by operation id on replay.
//!
//! # Blocking
//!
//! An operation is not handed out while an earlier operation on the same key
//! is InFlight or Failed, so a conflict on a key holds back everything queued
//! after it on that key.

use crate::{
    error::Result,
    operation::{Failure, OpKind, OpStatus, Operation},
    record::Fields,
    CollectionName, Error, NodeId, RecordKey, Seq, VersionToken,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// What `enqueue` did with an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "camelCase")]
pub enum Enqueued {
    /// Appended as a new operation
    Appended { seq: Seq },
    /// Folded into the queued operation `seq`
    Merged { seq: Seq },
    /// Queued update `dropped` discarded; delete appended as `seq`
    Superseded { dropped: Seq, seq: Seq },
    /// Queued insert `seq` and the new delete cancelled each other
    Cancelled { seq: Seq },
    /// Queued delete `seq` already covers the new operation
    Unchanged { seq: Seq },
}

impl Enqueued {
    /// Sequence number of the operation now representing the mutation.
    pub fn seq(&self) -> Seq {
        match *self {
            Enqueued::Appended { seq }
            | Enqueued::Merged { seq }
            | Enqueued::Superseded { seq, .. }
            | Enqueued::Cancelled { seq }
            | Enqueued::Unchanged { seq } => seq,
        }
    }
}

/// Ordered log of pending local mutations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationQueue {
    node_id: NodeId,
    ops: BTreeMap<Seq, Operation>,
    next_seq: Seq,
    capacity: Option<usize>,
}

impl OperationQueue {
    /// Create an empty, unbounded queue for a node.
    pub fn new(node_id: impl Into<NodeId>) -> Self {
        Self {
            node_id: node_id.into(),
            ops: BTreeMap::new(),
            next_seq: 1,
            capacity: None,
        }
    }

    /// Rebuild a queue from persisted operations.
    ///
    /// Operations left InFlight by an interrupted push go back to Pending.
    pub fn restore(
        node_id: impl Into<NodeId>,
        ops: impl IntoIterator<Item = Operation>,
        next_seq: Seq,
    ) -> Self {
        let mut queue = Self::new(node_id);
        for mut op in ops {
            if op.status == OpStatus::InFlight {
                op.status = OpStatus::Pending;
            }
            queue.ops.insert(op.seq, op);
        }
        let after_last = queue.ops.keys().next_back().map_or(1, |seq| seq + 1);
        queue.next_seq = next_seq.max(after_last);
        queue
    }

    /// Builder-style capacity bound.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn set_capacity(&mut self, capacity: Option<usize>) {
        self.capacity = capacity;
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// The sequence number the next appended operation will receive.
    pub fn next_seq(&self) -> Seq {
        self.next_seq
    }

    /// Number of retained operations (pending, in flight and failed).
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn get(&self, seq: Seq) -> Option<&Operation> {
        self.ops.get(&seq)
    }

    /// All retained operations in sequence order.
    pub fn iter(&self) -> impl Iterator<Item = &Operation> {
        self.ops.values()
    }

    pub fn pending(&self) -> impl Iterator<Item = &Operation> {
        self.ops.values().filter(|op| op.is_pending())
    }

    pub fn failed(&self) -> impl Iterator<Item = &Operation> {
        self.ops.values().filter(|op| op.is_failed())
    }

    pub fn in_flight(&self) -> impl Iterator<Item = &Operation> {
        self.ops
            .values()
            .filter(|op| op.status == OpStatus::InFlight)
    }

    /// Operations targeting one record, in sequence order.
    pub fn for_key<'a>(
        &'a self,
        collection: &'a str,
        key: &'a str,
    ) -> impl DoubleEndedIterator<Item = &'a Operation> + 'a {
        self.ops
            .values()
            .filter(move |op| op.targets(collection, key))
    }

    /// Whether any operation is retained for the record.
    pub fn has_queued_for(&self, collection: &str, key: &str) -> bool {
        self.for_key(collection, key).next().is_some()
    }

    /// Append a mutation, coalescing with the key's latest queued operation.
    pub fn enqueue(&mut self, mut op: Operation) -> Result<Enqueued> {
        let latest = self
            .for_key(&op.collection, &op.key)
            .next_back()
            .map(|queued| (queued.seq, queued.kind, queued.is_pending() && !queued.was_sent()));

        if let Some((seq, queued_kind, coalescable)) = latest {
            match (queued_kind, op.kind) {
                (OpKind::Delete, OpKind::Delete) => return Ok(Enqueued::Unchanged { seq }),
                (OpKind::Delete, OpKind::Update) => return Err(Error::OperationOnDeleted(op.key)),
                _ => {}
            }

            if coalescable {
                match (queued_kind, op.kind) {
                    (OpKind::Insert, OpKind::Update) | (OpKind::Update, OpKind::Update) => {
                        if let Some(queued) = self.ops.get_mut(&seq) {
                            queued.fields = op.fields;
                        }
                        return Ok(Enqueued::Merged { seq });
                    }
                    (OpKind::Insert, OpKind::Delete) => {
                        self.ops.remove(&seq);
                        return Ok(Enqueued::Cancelled { seq });
                    }
                    (OpKind::Update, OpKind::Delete) => {
                        if let Some(dropped) = self.ops.remove(&seq) {
                            op.base_version = dropped.base_version;
                        }
                        let new_seq = self.append(op);
                        return Ok(Enqueued::Superseded {
                            dropped: seq,
                            seq: new_seq,
                        });
                    }
                    _ => {}
                }
            }
        }

        if let Some(capacity) = self.capacity {
            if self.ops.len() >= capacity {
                return Err(Error::FullQueue { capacity });
            }
        }
        Ok(Enqueued::Appended {
            seq: self.append(op),
        })
    }

    fn append(&mut self, mut op: Operation) -> Seq {
        let seq = self.next_seq;
        self.next_seq += 1;

        op.seq = seq;
        op.op_id = format!("{}:{}", self.node_id, seq);
        op.status = OpStatus::Pending;
        op.attempts = 0;
        op.failure = None;
        self.ops.insert(seq, op);
        seq
    }

    /// Hand out up to `max` Pending operations, oldest first, marking them InFlight.
    ///
    /// Operations behind an InFlight or Failed operation on the same key are skipped.
    pub fn dequeue_batch(&mut self, max: usize) -> Vec<Operation> {
        self.dequeue_where(max, |_| true)
    }

    /// Like [`dequeue_batch`](Self::dequeue_batch), limited to one collection.
    pub fn dequeue_collection(&mut self, collection: &str, max: usize) -> Vec<Operation> {
        self.dequeue_where(max, |op| op.collection == collection)
    }

    fn dequeue_where(&mut self, max: usize, filter: impl Fn(&Operation) -> bool) -> Vec<Operation> {
        let mut blocked: HashSet<(&str, &str)> = HashSet::new();
        let mut selected = Vec::new();

        for op in self.ops.values().filter(|op| filter(op)) {
            if selected.len() >= max {
                break;
            }
            let key = (op.collection.as_str(), op.key.as_str());
            match op.status {
                OpStatus::InFlight | OpStatus::Failed => {
                    blocked.insert(key);
                }
                OpStatus::Pending if !blocked.contains(&key) => selected.push(op.seq),
                _ => {}
            }
        }

        let mut batch = Vec::with_capacity(selected.len());
        for seq in selected {
            if let Some(op) = self.ops.get_mut(&seq) {
                op.status = OpStatus::InFlight;
                op.attempts += 1;
                batch.push(op.clone());
            }
        }
        batch
    }

    /// Remove an acknowledged operation.
    ///
    /// Later operations on the same key were made on top of this one, so they
    /// are rebased onto the version token the remote just assigned.
    pub fn mark_acknowledged(
        &mut self,
        seq: Seq,
        version: Option<VersionToken>,
    ) -> Result<Operation> {
        self.expect_status(seq, OpStatus::InFlight)?;
        let mut op = self.ops.remove(&seq).ok_or(Error::OperationNotFound(seq))?;
        op.status = OpStatus::Acknowledged;

        for later in self.ops.range_mut(seq..).map(|(_, later)| later) {
            if later.targets(&op.collection, &op.key) {
                later.base_version = version.clone();
            }
        }
        Ok(op)
    }

    /// Mark an in-flight operation as failed.
    pub fn mark_failed(&mut self, seq: Seq, failure: Failure) -> Result<()> {
        self.expect_status(seq, OpStatus::InFlight)?;
        let op = self.ops.get_mut(&seq).ok_or(Error::OperationNotFound(seq))?;
        op.status = OpStatus::Failed;
        op.failure = Some(failure);
        Ok(())
    }

    /// Return one in-flight operation to Pending without counting it as sent.
    pub fn release(&mut self, seq: Seq) -> Result<()> {
        self.expect_status(seq, OpStatus::InFlight)?;
        if let Some(op) = self.ops.get_mut(&seq) {
            op.status = OpStatus::Pending;
            op.attempts = op.attempts.saturating_sub(1);
        }
        Ok(())
    }

    /// Return every in-flight operation to Pending after an aborted attempt.
    ///
    /// They count as sent: the remote may have applied them before the failure.
    pub fn release_in_flight(&mut self) -> Vec<Seq> {
        self.release_where(|_| true)
    }

    /// Like [`release_in_flight`](Self::release_in_flight), limited to one collection.
    pub fn release_collection(&mut self, collection: &str) -> Vec<Seq> {
        self.release_where(|op| op.collection == collection)
    }

    fn release_where(&mut self, filter: impl Fn(&Operation) -> bool) -> Vec<Seq> {
        let mut released = Vec::new();
        for op in self.ops.values_mut() {
            if op.status == OpStatus::InFlight && filter(op) {
                op.status = OpStatus::Pending;
                released.push(op.seq);
            }
        }
        released
    }

    /// Put a failed operation back in line unchanged.
    pub fn retry(&mut self, seq: Seq) -> Result<()> {
        self.expect_status(seq, OpStatus::Failed)?;
        if let Some(op) = self.ops.get_mut(&seq) {
            op.status = OpStatus::Pending;
            op.failure = None;
        }
        Ok(())
    }

    /// Rebase a failed operation onto a new base version, optionally with new
    /// fields, and put it back in line.
    ///
    /// An insert or update follows the base: with a base version it becomes an
    /// update of that version, without one it becomes an insert.
    pub fn rebase(
        &mut self,
        seq: Seq,
        base_version: Option<VersionToken>,
        fields: Option<Fields>,
    ) -> Result<()> {
        self.expect_status(seq, OpStatus::Failed)?;
        if let Some(op) = self.ops.get_mut(&seq) {
            if op.kind != OpKind::Delete {
                op.kind = match base_version {
                    Some(_) => OpKind::Update,
                    None => OpKind::Insert,
                };
                if let Some(fields) = fields {
                    op.fields = Some(fields);
                }
            }
            op.base_version = base_version;
            op.status = OpStatus::Pending;
            op.failure = None;
        }
        Ok(())
    }

    /// Drop a failed operation for good.
    pub fn discard(&mut self, seq: Seq) -> Result<Operation> {
        self.expect_status(seq, OpStatus::Failed)?;
        self.ops.remove(&seq).ok_or(Error::OperationNotFound(seq))
    }

    /// Replace every operation of one record. Used to roll back a failed write.
    pub fn replace_for_key(
        &mut self,
        collection: &CollectionName,
        key: &RecordKey,
        ops: Vec<Operation>,
    ) {
        self.ops.retain(|_, op| !op.targets(collection, key));
        for op in ops {
            self.ops.insert(op.seq, op);
        }
    }

    /// Restore the sequence counter. It never moves backwards past retained operations.
    pub fn reset_next_seq(&mut self, next_seq: Seq) {
        let after_last = self.ops.keys().next_back().map_or(1, |seq| seq + 1);
        self.next_seq = next_seq.max(after_last);
    }

    fn expect_status(&self, seq: Seq, expected: OpStatus) -> Result<()> {
        let op = self.ops.get(&seq).ok_or(Error::OperationNotFound(seq))?;
        if op.status != expected {
            return Err(Error::InvalidStatus {
                seq,
                status: op.status.to_string(),
                expected: expected.to_string(),
            });
        }
        Ok(())
    }
}
