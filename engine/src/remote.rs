//! Wire types shared with the remote, and an in-memory remote authority.
//!
//! The remote owns version tokens and change markers. A push is accepted when
//! the operation's base version matches the remote's current version; pulls
//! return changes after a cursor in marker order.

use crate::{
    operation::{OpKind, OperationId},
    query::Predicate,
    record::Fields,
    ChangeMarker, CollectionName, RecordKey, VersionToken,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};

/// A record as the remote holds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRecord {
    pub key: RecordKey,
    #[serde(default)]
    pub fields: Fields,
    pub version: VersionToken,
    #[serde(default)]
    pub deleted: bool,
    /// Change marker assigned when this version was written
    pub marker: ChangeMarker,
}

/// One operation sent to the remote collection endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub op_id: OperationId,
    pub kind: OpKind,
    /// May be omitted on the wire when the endpoint path names the record
    #[serde(default)]
    pub collection: CollectionName,
    #[serde(default)]
    pub key: RecordKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Fields>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_version: Option<VersionToken>,
}

impl PushRequest {
    /// Whether the remote should accept this request given its current record.
    ///
    /// - Insert: accepted unless a live record exists.
    /// - Update: the live record's version must equal the base version.
    /// - Delete: a missing or already deleted record is accepted as is;
    ///   otherwise the versions must match.
    pub fn accepts(&self, current: Option<&RemoteRecord>) -> bool {
        let live = current.filter(|record| !record.deleted);
        match self.kind {
            OpKind::Insert => live.is_none(),
            OpKind::Update => {
                live.is_some_and(|record| self.base_version.as_ref() == Some(&record.version))
            }
            OpKind::Delete => match live {
                None => true,
                Some(record) => self.base_version.as_ref() == Some(&record.version),
            },
        }
    }
}

/// Remote reply to a push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum PushReply {
    Accepted {
        version: VersionToken,
        marker: ChangeMarker,
    },
    Conflict {
        #[serde(default)]
        current: Option<RemoteRecord>,
    },
}

/// Request for one page of remote changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    /// Return changes with a marker strictly greater than this
    pub since: ChangeMarker,
    pub limit: usize,
    #[serde(default)]
    pub filter: Predicate,
}

impl PullRequest {
    /// Page size used when none is configured.
    pub const DEFAULT_LIMIT: usize = 100;
}

impl Default for PullRequest {
    fn default() -> Self {
        Self {
            since: 0,
            limit: Self::DEFAULT_LIMIT,
            filter: Predicate::All,
        }
    }
}

/// One page of remote changes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullPage {
    /// Changed records in marker order; tombstones included
    pub records: Vec<RemoteRecord>,
    /// Cursor to resume from
    pub next_cursor: ChangeMarker,
    /// No further changes after this page
    pub end: bool,
}

/// Scan records in marker order and build one page.
///
/// Tombstones are always returned so deletions propagate regardless of the
/// filter. The cursor moves past filtered-out records too.
pub fn page_of<'a, I>(records: I, request: &PullRequest) -> PullPage
where
    I: IntoIterator<Item = &'a RemoteRecord>,
{
    let mut changed: Vec<&RemoteRecord> = records
        .into_iter()
        .filter(|record| record.marker > request.since)
        .collect();
    changed.sort_by_key(|record| record.marker);

    let mut builder = PageBuilder::new(request);
    for record in changed {
        if !builder.offer(record) {
            break;
        }
    }
    builder.finish()
}

/// Builds a page from records offered in marker order, for remotes that scan
/// their storage incrementally.
#[derive(Debug)]
pub struct PageBuilder<'a> {
    request: &'a PullRequest,
    page: PullPage,
}

impl<'a> PageBuilder<'a> {
    pub fn new(request: &'a PullRequest) -> Self {
        Self {
            request,
            page: PullPage {
                records: Vec::new(),
                next_cursor: request.since,
                end: true,
            },
        }
    }

    /// Offer the next record after the cursor. Returns `false` once the page
    /// is full; the record was not taken and the page is marked unfinished.
    pub fn offer(&mut self, record: &RemoteRecord) -> bool {
        if self.page.records.len() >= self.request.limit.max(1) {
            self.page.end = false;
            return false;
        }
        self.page.next_cursor = record.marker;
        if record.deleted || self.request.filter.matches(&record.fields) {
            self.page.records.push(record.clone());
        }
        true
    }

    pub fn finish(self) -> PullPage {
        self.page
    }
}

/// Replies remembered for replay by default.
const DEFAULT_REPLY_LIMIT: usize = 10_000;

/// Single-tenant in-memory remote authority.
///
/// Used by tests, the in-memory transport and the reference server. Only the
/// most recent `reply_limit` accepted operations are recognized on replay; an
/// older operation id is judged again against the current record.
#[derive(Debug, Clone)]
pub struct RemoteStore {
    collections: BTreeMap<CollectionName, BTreeMap<RecordKey, RemoteRecord>>,
    replies: HashMap<OperationId, PushReply>,
    /// Replayable operation ids, oldest first
    reply_order: VecDeque<OperationId>,
    reply_limit: usize,
    last_marker: ChangeMarker,
    last_version: u64,
}

impl Default for RemoteStore {
    fn default() -> Self {
        Self {
            collections: BTreeMap::new(),
            replies: HashMap::new(),
            reply_order: VecDeque::new(),
            reply_limit: DEFAULT_REPLY_LIMIT,
            last_marker: 0,
            last_version: 0,
        }
    }
}

impl RemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style bound on remembered replies. At least one is kept.
    pub fn with_reply_limit(mut self, limit: usize) -> Self {
        self.reply_limit = limit.max(1);
        self
    }

    /// Number of operation ids currently recognized on replay.
    pub fn remembered_replies(&self) -> usize {
        self.replies.len()
    }

    /// Apply a push. Replayed operation ids return their original reply.
    pub fn push(&mut self, request: &PushRequest) -> PushReply {
        if let Some(reply) = self.replies.get(&request.op_id) {
            return reply.clone();
        }

        let current = self.get(&request.collection, &request.key).cloned();
        if !request.accepts(current.as_ref()) {
            return PushReply::Conflict { current };
        }

        let reply = match (request.kind, current) {
            // Deleting something already gone changes nothing
            (OpKind::Delete, Some(existing)) if existing.deleted => PushReply::Accepted {
                version: existing.version,
                marker: existing.marker,
            },
            (kind, _) => {
                let record = self.write(
                    &request.collection,
                    &request.key,
                    request.fields.clone().unwrap_or_default(),
                    kind == OpKind::Delete,
                );
                PushReply::Accepted {
                    version: record.version,
                    marker: record.marker,
                }
            }
        };
        self.remember(&request.op_id, &reply);
        reply
    }

    fn remember(&mut self, op_id: &OperationId, reply: &PushReply) {
        while self.reply_order.len() >= self.reply_limit {
            if let Some(oldest) = self.reply_order.pop_front() {
                self.replies.remove(&oldest);
            }
        }
        self.reply_order.push_back(op_id.clone());
        self.replies.insert(op_id.clone(), reply.clone());
    }

    /// Fetch one page of changes for a collection.
    pub fn pull(&self, collection: &str, request: &PullRequest) -> PullPage {
        match self.collections.get(collection) {
            Some(records) => page_of(records.values(), request),
            None => PullPage {
                records: Vec::new(),
                next_cursor: request.since,
                end: true,
            },
        }
    }

    /// Current record, tombstones included.
    pub fn get(&self, collection: &str, key: &str) -> Option<&RemoteRecord> {
        self.collections.get(collection)?.get(key)
    }

    /// Live records of a collection, ordered by key.
    pub fn live(&self, collection: &str) -> Vec<&RemoteRecord> {
        self.collections
            .get(collection)
            .map(|records| records.values().filter(|r| !r.deleted).collect())
            .unwrap_or_default()
    }

    /// Highest change marker handed out.
    pub fn last_marker(&self) -> ChangeMarker {
        self.last_marker
    }

    /// Write a record directly, bypassing version checks.
    pub fn write(
        &mut self,
        collection: &str,
        key: &str,
        fields: Fields,
        deleted: bool,
    ) -> RemoteRecord {
        self.last_marker += 1;
        self.last_version += 1;

        let existing = self
            .collections
            .get(collection)
            .and_then(|records| records.get(key));
        let fields = if deleted {
            existing.map(|r| r.fields.clone()).unwrap_or_default()
        } else {
            fields
        };

        let record = RemoteRecord {
            key: key.to_string(),
            fields,
            version: format!("v{}", self.last_version),
            deleted,
            marker: self.last_marker,
        };
        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), record.clone());
        record
    }
}
