//! # Ferry Engine
//!
//! The deterministic core of an offline-first sync engine.
//!
//! This crate holds everything about local records, queued mutations and
//! merging remote changes that can be decided without touching a disk or a
//! network. The `ferry-client` crate wraps it with durable storage and a
//! transport.
//!
//! ## Design Principles
//!
//! - **No IO**: Engine has no knowledge of files, network, or platform
//! - **Deterministic**: Timestamps and ids are inputs, never read from the system
//! - **Testable**: Pure logic, no mocks needed
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A [`Record`] is a keyed map of JSON fields inside a collection. It carries
//! the version token the remote assigned on the last successful sync, a dirty
//! flag for unsynced local edits, and a tombstone flag for local deletes
//! awaiting acknowledgment.
//!
//! ### Operations
//!
//! Every local insert, update or delete appends an [`Operation`] to the
//! [`OperationQueue`]. Operations are pushed in sequence order; each carries
//! the version token it was made against, so the remote can detect a
//! concurrent change and answer with a [`Conflict`].
//!
//! ### Reconciliation
//!
//! The [`Reconciler`] merges a page of remote changes. A clean record takes
//! the remote version; a record with unsynced edits is never overwritten and
//! the remote version is staged beside it as a [`PullConflict`].
//!
//! ## Quick Start
//!
//! ```rust
//! use ferry_engine::{
//!     CollectionSchema, FieldDef, FieldType, Predicate, RemoteStore, Replica, Schema,
//! };
//! use serde_json::json;
//!
//! // 1. Define a schema
//! let schema = Schema::new().with_collection(CollectionSchema::new(
//!     "todos",
//!     vec![
//!         FieldDef::required("text", FieldType::String),
//!         FieldDef::required("complete", FieldType::Bool),
//!     ],
//! ));
//!
//! // 2. Mutate the replica; each mutation is queued
//! let mut replica = Replica::new(schema, "device_1");
//! let fields = json!({"text": "milk", "complete": false});
//! replica
//!     .insert("todos", "1", fields.as_object().cloned().unwrap(), 1706745600000)
//!     .unwrap();
//!
//! // 3. Push the queue to a remote
//! let mut remote = RemoteStore::new();
//! for op in replica.queue_mut().dequeue_batch(10) {
//!     if let ferry_engine::PushReply::Accepted { version, .. } =
//!         remote.push(&op.to_push_request())
//!     {
//!         replica.acknowledge(op.seq, version).unwrap();
//!     }
//! }
//!
//! // 4. Query records
//! let open = replica
//!     .query("todos", &Predicate::eq("complete", false))
//!     .unwrap();
//! assert_eq!(open.len(), 1);
//! assert!(!open[0].dirty);
//! ```

pub mod conflict;
pub mod cursor;
pub mod error;
pub mod operation;
pub mod query;
pub mod queue;
pub mod reconcile;
pub mod record;
pub mod remote;
pub mod replica;
pub mod schema;

// Re-export main types at crate root
pub use conflict::{Conflict, ConflictPolicy, ConflictResolver, PullConflict, Resolution};
pub use cursor::{Cursors, QueryCursor};
pub use error::{Error, ErrorKind, Result};
pub use operation::{Failure, OpKind, OpStatus, Operation, OperationId};
pub use query::Predicate;
pub use queue::{Enqueued, OperationQueue};
pub use reconcile::{ReconcileResult, Reconciler};
pub use record::{Fields, Metadata, Origin, Record};
pub use remote::{
    page_of, PageBuilder, PullPage, PullRequest, PushReply, PushRequest, RemoteRecord, RemoteStore,
};
pub use replica::{Checkpoint, RecordSet, Replica};
pub use schema::{CollectionSchema, FieldDef, FieldType, Schema};

/// Type aliases for clarity
pub type RecordKey = String;
pub type CollectionName = String;
pub type NodeId = String;
pub type VersionToken = String;
pub type QueryName = String;
pub type Seq = u64;
pub type ChangeMarker = u64;
pub type Timestamp = u64;
