//! # Ferry Client
//!
//! The IO side of Ferry: a durable [`LocalStore`] on SQLite, transports to a
//! remote, the [`SyncEngine`] that pushes and pulls, and the typed
//! [`Collection`] client applications use.
//!
//! ```no_run
//! use ferry_client::{Collection, Document, LocalStore, SyncConfig, SyncEngine};
//! use ferry_engine::{CollectionSchema, Predicate, Schema};
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Serialize, Deserialize)]
//! struct Todo {
//!     id: String,
//!     text: String,
//!     complete: bool,
//! }
//!
//! impl Document for Todo {
//!     fn key(&self) -> &str {
//!         &self.id
//!     }
//! }
//!
//! # async fn run() -> ferry_engine::Result<()> {
//! let schema = Schema::new().with_collection(CollectionSchema::untyped("todos"));
//! let store = Arc::new(LocalStore::open("todos.db", schema).await?);
//! let config = SyncConfig::new().with_endpoint("http://localhost:3000");
//! let engine = Arc::new(SyncEngine::connect(store, &config).await?);
//! let todos: Collection<Todo> = Collection::new("todos", engine);
//!
//! todos
//!     .insert(&Todo { id: todos.new_key(), text: "milk".into(), complete: false })
//!     .await?;
//! todos.sync("open", &Predicate::eq("complete", false)).await?;
//! let open = todos.query(&Predicate::eq("complete", false)).await?;
//! # Ok(())
//! # }
//! ```

pub mod collection;
pub mod config;
pub mod error;
pub mod store;
pub mod sync;
pub mod transport;

pub use collection::{new_key, Collection, Document};
pub use config::{RetryPolicy, SyncConfig};
pub use error::Result;
pub use store::LocalStore;
pub use sync::{
    CancelHandle, PullResult, PushResult, SyncEngine, SyncEvent, SyncObserver, SyncResult,
};
pub use transport::{HttpRemote, MemoryRemote, Remote};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub(crate) fn now() -> ferry_engine::Timestamp {
    chrono::Utc::now().timestamp_millis().max(0) as ferry_engine::Timestamp
}
