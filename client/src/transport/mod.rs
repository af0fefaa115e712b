//! Transports that carry pushes and pulls to a remote.
//!
//! A [`Remote`] answers two requests: apply one queued operation, and return
//! a page of changes after a cursor. [`HttpRemote`] talks to `ferry-server`;
//! [`MemoryRemote`] keeps the remote in process for tests and local tools.

mod http;
mod memory;

pub use http::HttpRemote;
pub use memory::MemoryRemote;

use crate::error::Result;
use async_trait::async_trait;
use ferry_engine::{PullPage, PullRequest, PushReply, PushRequest};

/// The remote side of a sync.
///
/// Implementations return `Err` only when no answer was obtained: transport
/// failures are [`ferry_engine::Error::Transport`], a malformed endpoint is
/// [`ferry_engine::Error::Configuration`]. A version mismatch is an answer,
/// reported as [`PushReply::Conflict`].
#[async_trait]
pub trait Remote: Send + Sync {
    /// Apply one operation. Replaying an operation id returns the first reply.
    async fn push(&self, request: &PushRequest) -> Result<PushReply>;

    /// Fetch changes to a collection after `request.since`.
    async fn pull(&self, collection: &str, request: &PullRequest) -> Result<PullPage>;
}
