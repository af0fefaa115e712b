//! Operation types for expressing local mutations.
//!
//! Every local insert, update or delete produces an operation that waits in
//! the [`OperationQueue`](crate::OperationQueue) until the remote acknowledges it.

use crate::{
    conflict::Conflict, remote::PushRequest, record::Fields, CollectionName, RecordKey, Seq,
    Timestamp, VersionToken,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for an operation, `"{node_id}:{seq}"`.
pub type OperationId = String;

/// Kind of mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKind::Insert => write!(f, "insert"),
            OpKind::Update => write!(f, "update"),
            OpKind::Delete => write!(f, "delete"),
        }
    }
}

/// Lifecycle status of a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OpStatus {
    /// Waiting to be pushed
    Pending,
    /// Sent to the remote, acknowledgment outstanding
    InFlight,
    /// Accepted by the remote; removed from the queue
    Acknowledged,
    /// Rejected; kept for inspection until retried or discarded
    Failed,
}

impl fmt::Display for OpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpStatus::Pending => write!(f, "pending"),
            OpStatus::InFlight => write!(f, "in-flight"),
            OpStatus::Acknowledged => write!(f, "acknowledged"),
            OpStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Why an operation failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Failure {
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict: Option<Box<Conflict>>,
}

impl Failure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            conflict: None,
        }
    }

    pub fn conflict(conflict: Conflict) -> Self {
        Self {
            reason: "version mismatch".to_string(),
            conflict: Some(Box::new(conflict)),
        }
    }
}

/// A queued local mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Push order; assigned at enqueue, never reused
    pub seq: Seq,
    /// Globally unique id, used by the remote to recognize replays
    pub op_id: OperationId,
    pub kind: OpKind,
    pub collection: CollectionName,
    pub key: RecordKey,
    /// Full field set for inserts and updates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Fields>,
    /// Version token the mutation was made against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_version: Option<VersionToken>,
    pub status: OpStatus,
    /// Times this operation has been handed out for sending
    #[serde(default)]
    pub attempts: u32,
    pub enqueued_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
}

impl Operation {
    fn new(
        kind: OpKind,
        collection: impl Into<CollectionName>,
        key: impl Into<RecordKey>,
        fields: Option<Fields>,
        base_version: Option<VersionToken>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            seq: 0,
            op_id: OperationId::new(),
            kind,
            collection: collection.into(),
            key: key.into(),
            fields,
            base_version,
            status: OpStatus::Pending,
            attempts: 0,
            enqueued_at: timestamp,
            failure: None,
        }
    }

    /// Create an insert operation. Sequence number is assigned on enqueue.
    pub fn insert(
        collection: impl Into<CollectionName>,
        key: impl Into<RecordKey>,
        fields: Fields,
        timestamp: Timestamp,
    ) -> Self {
        Self::new(OpKind::Insert, collection, key, Some(fields), None, timestamp)
    }

    /// Create an update operation based on `base_version`.
    pub fn update(
        collection: impl Into<CollectionName>,
        key: impl Into<RecordKey>,
        fields: Fields,
        base_version: Option<VersionToken>,
        timestamp: Timestamp,
    ) -> Self {
        Self::new(
            OpKind::Update,
            collection,
            key,
            Some(fields),
            base_version,
            timestamp,
        )
    }

    /// Create a delete operation based on `base_version`.
    pub fn delete(
        collection: impl Into<CollectionName>,
        key: impl Into<RecordKey>,
        base_version: Option<VersionToken>,
        timestamp: Timestamp,
    ) -> Self {
        Self::new(
            OpKind::Delete,
            collection,
            key,
            None,
            base_version,
            timestamp,
        )
    }

    pub fn is_pending(&self) -> bool {
        self.status == OpStatus::Pending
    }

    pub fn is_failed(&self) -> bool {
        self.status == OpStatus::Failed
    }

    /// Whether the remote may already have seen this operation.
    pub fn was_sent(&self) -> bool {
        self.attempts > 0
    }

    /// Whether this operation targets the given record.
    pub fn targets(&self, collection: &str, key: &str) -> bool {
        self.collection == collection && self.key == key
    }

    /// The conflict recorded on a failed operation.
    pub fn conflict(&self) -> Option<&Conflict> {
        self.failure.as_ref()?.conflict.as_deref()
    }

    /// Build the request sent to the remote collection endpoint.
    pub fn to_push_request(&self) -> PushRequest {
        PushRequest {
            op_id: self.op_id.clone(),
            kind: self.kind,
            collection: self.collection.clone(),
            key: self.key.clone(),
            fields: self.fields.clone(),
            base_version: self.base_version.clone(),
        }
    }
}

/// Operations are ordered by sequence number.
impl Ord for Operation {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.seq.cmp(&other.seq)
    }
}

impl PartialOrd for Operation {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Eq for Operation {}
