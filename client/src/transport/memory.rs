//! In-process remote for tests.
//!
//! Wraps a [`RemoteStore`] and lets a test inject failures and inspect what
//! was sent.

use super::Remote;
use crate::error::Result;
use async_trait::async_trait;
use ferry_engine::{
    Error, Fields, PullPage, PullRequest, PushReply, PushRequest, RemoteRecord, RemoteStore,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// Remote held in memory. Clones share state, so several clients can sync
/// against the same instance.
#[derive(Debug, Default, Clone)]
pub struct MemoryRemote {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    store: RemoteStore,
    pushed: Vec<PushRequest>,
    pulls: usize,
    fail_next_push: Option<String>,
    fail_next_pull: Option<String>,
    // Apply the next push but report a transport failure, as a lost response would
    drop_next_reply: bool,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cause the next push to fail with a transport error before it is applied.
    pub fn fail_next_push(&self, error: &str) {
        self.inner.lock().fail_next_push = Some(error.to_string());
    }

    /// Cause the next pull to fail with a transport error.
    pub fn fail_next_pull(&self, error: &str) {
        self.inner.lock().fail_next_pull = Some(error.to_string());
    }

    /// Apply the next push, then lose its reply.
    pub fn drop_next_reply(&self) {
        self.inner.lock().drop_next_reply = true;
    }

    /// Every push request received, replays included.
    pub fn pushed(&self) -> Vec<PushRequest> {
        self.inner.lock().pushed.clone()
    }

    /// Number of pull requests served.
    pub fn pull_count(&self) -> usize {
        self.inner.lock().pulls
    }

    /// Current remote state of a record.
    pub fn get(&self, collection: &str, key: &str) -> Option<RemoteRecord> {
        self.inner.lock().store.get(collection, key).cloned()
    }

    /// Live remote records of a collection.
    pub fn live(&self, collection: &str) -> Vec<RemoteRecord> {
        self.inner
            .lock()
            .store
            .live(collection)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Change a record directly, as another writer would.
    pub fn write(&self, collection: &str, key: &str, fields: Fields) -> RemoteRecord {
        self.inner.lock().store.write(collection, key, fields, false)
    }

    /// Delete a record directly, as another writer would.
    pub fn remove(&self, collection: &str, key: &str) -> RemoteRecord {
        self.inner
            .lock()
            .store
            .write(collection, key, Fields::new(), true)
    }
}

#[async_trait]
impl Remote for MemoryRemote {
    async fn push(&self, request: &PushRequest) -> Result<PushReply> {
        let mut inner = self.inner.lock();

        if let Some(error) = inner.fail_next_push.take() {
            return Err(Error::Transport(error));
        }

        inner.pushed.push(request.clone());
        let reply = inner.store.push(request);

        if std::mem::take(&mut inner.drop_next_reply) {
            return Err(Error::Transport("reply lost".into()));
        }
        Ok(reply)
    }

    async fn pull(&self, collection: &str, request: &PullRequest) -> Result<PullPage> {
        let mut inner = self.inner.lock();

        if let Some(error) = inner.fail_next_pull.take() {
            return Err(Error::Transport(error));
        }

        inner.pulls += 1;
        Ok(inner.store.pull(collection, request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_engine::OpKind;
    use serde_json::json;

    fn insert(op_id: &str, key: &str) -> PushRequest {
        PushRequest {
            op_id: op_id.into(),
            kind: OpKind::Insert,
            collection: "todos".into(),
            key: key.into(),
            fields: json!({"text": "milk"}).as_object().cloned(),
            base_version: None,
        }
    }

    #[tokio::test]
    async fn clones_share_state() {
        let remote = MemoryRemote::new();
        let other = remote.clone();

        remote.push(&insert("a:1", "1")).await.unwrap();

        assert!(other.get("todos", "1").is_some());
        assert_eq!(other.pushed().len(), 1);
    }

    #[tokio::test]
    async fn injected_push_failure_is_not_applied() {
        let remote = MemoryRemote::new();
        remote.fail_next_push("connection reset");

        let err = remote.push(&insert("a:1", "1")).await.unwrap_err();

        assert!(err.is_retryable());
        assert!(remote.get("todos", "1").is_none());
        assert!(remote.push(&insert("a:1", "1")).await.is_ok());
    }

    #[tokio::test]
    async fn lost_reply_is_recovered_by_replay() {
        let remote = MemoryRemote::new();
        remote.drop_next_reply();

        assert!(remote.push(&insert("a:1", "1")).await.is_err());
        assert!(remote.get("todos", "1").is_some());

        let replay = remote.push(&insert("a:1", "1")).await.unwrap();
        assert!(matches!(replay, PushReply::Accepted { .. }));
        assert_eq!(remote.live("todos").len(), 1);
    }

    #[tokio::test]
    async fn pull_failure_then_success() {
        let remote = MemoryRemote::new();
        remote.write("todos", "1", Fields::new());
        remote.fail_next_pull("timeout");

        assert!(remote.pull("todos", &PullRequest::default()).await.is_err());
        let page = remote.pull("todos", &PullRequest::default()).await.unwrap();

        assert_eq!(page.records.len(), 1);
        assert_eq!(remote.pull_count(), 1);
    }
}
