//! Merging pulled remote changes into the local replica.
//!
//! # Rules
//!
//! For each remote record in a page, in remote order:
//!
//! 1. No local record: insert it clean, unless it is a tombstone.
//! 2. Local record with unsynced edits (dirty or with queued operations):
//!    never overwritten. A different remote version is staged on the record
//!    and reported as a [`PullConflict`].
//! 3. Clean local record: last writer wins by version token. A remote
//!    tombstone purges it.
//!
//! The query cursor advances to the page's cursor in the same step, so a
//! page is either merged with its cursor or not at all.

use crate::{
    conflict::PullConflict,
    error::Result,
    remote::{PullPage, RemoteRecord},
    replica::Replica,
    ChangeMarker, CollectionName, Record, RecordKey, Timestamp,
};
use serde::{Deserialize, Serialize};

/// What merging one page did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileResult {
    /// Records that did not exist locally
    pub inserted: Vec<RecordKey>,
    /// Clean records overwritten by a newer remote version
    pub updated: Vec<RecordKey>,
    /// Clean records removed by a remote tombstone
    pub purged: Vec<RecordKey>,
    /// Records already at the remote version, or tombstones of unknown records
    pub unchanged: Vec<RecordKey>,
    /// Remote changes held back by unsynced local edits
    pub conflicts: Vec<PullConflict>,
    /// Cursor after the page
    pub cursor: ChangeMarker,
}

impl ReconcileResult {
    /// Keys whose local state changed.
    pub fn touched(&self) -> impl Iterator<Item = &RecordKey> {
        self.inserted
            .iter()
            .chain(&self.updated)
            .chain(&self.purged)
            .chain(self.conflicts.iter().map(|c| &c.key))
    }

    /// Number of records changed locally, conflicts excluded.
    pub fn applied(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.purged.len()
    }
}

/// Merges pages of remote changes into one collection of a replica.
pub struct Reconciler<'a> {
    replica: &'a mut Replica,
    collection: CollectionName,
    timestamp: Timestamp,
    result: ReconcileResult,
}

impl<'a> Reconciler<'a> {
    /// Create a reconciler for one collection. `timestamp` stamps touched records.
    pub fn new(
        replica: &'a mut Replica,
        collection: impl Into<CollectionName>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            replica,
            collection: collection.into(),
            timestamp,
            result: ReconcileResult::default(),
        }
    }

    /// Merge a page and advance the named query's cursor.
    pub fn merge_page(mut self, query: &str, page: &PullPage) -> Result<ReconcileResult> {
        self.replica.schema().require(&self.collection)?;

        for remote in &page.records {
            self.merge_record(remote)?;
        }

        self.replica
            .advance_cursor(&self.collection, query, page.next_cursor)?;
        self.result.cursor = self.replica.cursor(&self.collection, query)?;
        Ok(self.result)
    }

    fn merge_record(&mut self, remote: &RemoteRecord) -> Result<()> {
        let key = remote.key.clone();
        let unsynced = self
            .replica
            .queue()
            .has_queued_for(&self.collection, &remote.key);

        let local = self.replica.record(&self.collection, &remote.key)?.cloned();
        match local {
            None if remote.deleted => self.result.unchanged.push(key),
            None => {
                self.replica.put(Record::from_remote(
                    self.collection.clone(),
                    remote,
                    self.timestamp,
                ))?;
                self.result.inserted.push(key);
            }
            Some(local) if local.version.as_ref() == Some(&remote.version) => {
                self.result.unchanged.push(key)
            }
            Some(local) if unsynced || local.dirty => self.stage(local, remote)?,
            Some(_) if remote.deleted => {
                self.replica.purge(&self.collection, &remote.key)?;
                self.result.purged.push(key);
            }
            Some(_) => {
                self.replica
                    .adopt_remote(&self.collection, remote, self.timestamp)?;
                self.result.updated.push(key);
            }
        }
        Ok(())
    }

    fn stage(&mut self, local: Record, remote: &RemoteRecord) -> Result<()> {
        if let Some(record) = self.replica.record_mut(&self.collection, &remote.key)? {
            record.staged = Some(remote.clone());
        }
        self.result.conflicts.push(PullConflict {
            collection: self.collection.clone(),
            key: remote.key.clone(),
            local,
            remote: remote.clone(),
        });
        Ok(())
    }
}
