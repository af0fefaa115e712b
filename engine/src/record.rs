//! Record types for storing data.

use crate::{remote::RemoteRecord, CollectionName, RecordKey, Timestamp, VersionToken};
use serde::{Deserialize, Serialize};

/// Ordered mapping of field name to value.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// Origin of the last change to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Created or modified locally
    Local,
    /// Received from remote
    Remote,
}

/// Metadata associated with a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// When the record was first seen by this store (milliseconds since epoch)
    pub created_at: Timestamp,
    /// When the record was last changed (milliseconds since epoch)
    pub updated_at: Timestamp,
    /// Whether the last change was local or pulled from remote
    pub origin: Origin,
}

impl Metadata {
    pub fn new(timestamp: Timestamp, origin: Origin) -> Self {
        Self {
            created_at: timestamp,
            updated_at: timestamp,
            origin,
        }
    }

    /// Record a change.
    pub fn touch(&mut self, timestamp: Timestamp, origin: Origin) {
        self.updated_at = timestamp;
        self.origin = origin;
    }
}

/// A data record in the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Unique key within the collection
    pub key: RecordKey,
    /// Collection this record belongs to
    pub collection: CollectionName,
    /// Field values, in insertion order
    pub fields: Fields,
    /// Version token assigned by the remote on the last successful sync
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<VersionToken>,
    /// Local changes not yet acknowledged by the remote
    pub dirty: bool,
    /// Tombstone flag; set on local delete until the push is acknowledged
    pub deleted: bool,
    /// Record metadata
    pub metadata: Metadata,
    /// Remote version received by a pull while a local edit was unsynced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staged: Option<RemoteRecord>,
}

impl Record {
    /// Create a new, never-synced local record.
    pub fn new(
        key: impl Into<RecordKey>,
        collection: impl Into<CollectionName>,
        fields: Fields,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            key: key.into(),
            collection: collection.into(),
            fields,
            version: None,
            dirty: true,
            deleted: false,
            metadata: Metadata::new(timestamp, Origin::Local),
            staged: None,
        }
    }

    /// Create a clean record from a remote snapshot.
    pub fn from_remote(
        collection: impl Into<CollectionName>,
        remote: &RemoteRecord,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            key: remote.key.clone(),
            collection: collection.into(),
            fields: remote.fields.clone(),
            version: Some(remote.version.clone()),
            dirty: false,
            deleted: remote.deleted,
            metadata: Metadata::new(timestamp, Origin::Remote),
            staged: None,
        }
    }

    /// Check if record is active (not tombstoned).
    pub fn is_active(&self) -> bool {
        !self.deleted
    }

    /// Get a field value.
    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.fields.get(field)
    }

    /// Mark record as deleted (tombstone).
    pub fn mark_deleted(&mut self, timestamp: Timestamp) {
        self.deleted = true;
        self.dirty = true;
        self.metadata.touch(timestamp, Origin::Local);
    }

    /// Replace the record's fields with a local edit.
    pub fn update_fields(&mut self, fields: Fields, timestamp: Timestamp) {
        self.fields = fields;
        self.dirty = true;
        self.metadata.touch(timestamp, Origin::Local);
    }

    /// Overwrite local state with a remote snapshot.
    pub fn adopt_remote(&mut self, remote: &RemoteRecord, timestamp: Timestamp) {
        self.fields = remote.fields.clone();
        self.version = Some(remote.version.clone());
        self.deleted = remote.deleted;
        self.dirty = false;
        self.staged = None;
        self.metadata.touch(timestamp, Origin::Remote);
    }
}
