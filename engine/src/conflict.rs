//! Conflict detail and conflict policies.
//!
//! A push conflict happens when the remote's current version token differs
//! from the token a queued operation was based on. A pull conflict happens
//! when a pulled record changed remotely while the local copy has unsynced
//! edits; the remote version is staged beside the local record instead of
//! overwriting it.

use crate::{
    operation::OpKind, record::Fields, remote::RemoteRecord, CollectionName, Record, RecordKey,
    Seq, VersionToken,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A version mismatch reported by the remote for a pushed operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    /// Sequence number of the rejected operation
    pub seq: Seq,
    pub collection: CollectionName,
    pub key: RecordKey,
    pub kind: OpKind,
    /// Version token the operation was based on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_version: Option<VersionToken>,
    /// Local record at the time of the conflict
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<Record>,
    /// Remote record at the time of the conflict; `None` if it does not exist
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteRecord>,
}

impl Conflict {
    /// Version token the remote currently holds.
    pub fn remote_version(&self) -> Option<&VersionToken> {
        self.remote.as_ref().map(|r| &r.version)
    }
}

/// A remote change that could not be merged over an unsynced local edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullConflict {
    pub collection: CollectionName,
    pub key: RecordKey,
    /// Local record, left untouched
    pub local: Record,
    /// Remote record, staged on the local record
    pub remote: RemoteRecord,
}

/// What to do with a conflicting operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Overwrite the remote: rebase the operation onto the remote version and resend
    KeepLocal,
    /// Drop the operation and adopt the remote record locally
    KeepRemote,
    /// Resend with these fields, rebased onto the remote version
    Merge(Fields),
    /// Leave the operation failed for the caller to handle later
    Defer,
}

/// Caller-supplied resolution function.
pub type ConflictResolver = dyn Fn(&Conflict) -> Resolution + Send + Sync;

/// How push reacts to a conflict.
#[derive(Clone, Default)]
pub enum ConflictPolicy {
    /// Mark the operation failed and abort the push with a conflict error
    #[default]
    FailFast,
    /// Mark the operation failed and keep pushing other keys
    Continue,
    /// Ask the resolver; deferred conflicts behave like `Continue`
    Resolve(Arc<ConflictResolver>),
}

impl ConflictPolicy {
    /// Build a resolving policy from a closure.
    pub fn resolve_with<F>(resolver: F) -> Self
    where
        F: Fn(&Conflict) -> Resolution + Send + Sync + 'static,
    {
        ConflictPolicy::Resolve(Arc::new(resolver))
    }

    /// Parse the name used in configuration files. Resolvers cannot be named.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "fail-fast" | "failfast" => Some(ConflictPolicy::FailFast),
            "continue" => Some(ConflictPolicy::Continue),
            _ => None,
        }
    }
}

impl fmt::Debug for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictPolicy::FailFast => write!(f, "FailFast"),
            ConflictPolicy::Continue => write!(f, "Continue"),
            ConflictPolicy::Resolve(_) => write!(f, "Resolve(<fn>)"),
        }
    }
}
