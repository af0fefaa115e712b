//! Typed collection client.
//!
//! [`Collection<T>`] converts documents to record fields and back, and routes
//! every mutation through the local store so it is queued for push.

use crate::error::Result;
use crate::store::LocalStore;
use crate::sync::{PullResult, PushResult, SyncEngine, SyncResult};
use ferry_engine::{Enqueued, Error, Fields, Operation, Predicate, Record};
use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;

/// A value stored as one record. Its key must not change over its lifetime.
pub trait Document: Serialize + DeserializeOwned + Send + Sync {
    fn key(&self) -> &str;
}

/// Generate a fresh random record key.
pub fn new_key() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Typed view of one registered collection.
pub struct Collection<T> {
    name: String,
    engine: Arc<SyncEngine>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            engine: Arc::clone(&self.engine),
            _marker: PhantomData,
        }
    }
}

impl<T: Document> Collection<T> {
    pub fn new(name: impl Into<String>, engine: Arc<SyncEngine>) -> Self {
        Self {
            name: name.into(),
            engine,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn new_key(&self) -> String {
        new_key()
    }

    fn store(&self) -> &LocalStore {
        self.engine.store()
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    pub async fn insert(&self, doc: &T) -> Result<Enqueued> {
        self.store()
            .enqueue_insert(&self.name, doc.key(), to_fields(doc)?)
            .await
    }

    pub async fn update(&self, doc: &T) -> Result<Enqueued> {
        self.store()
            .enqueue_update(&self.name, doc.key(), to_fields(doc)?)
            .await
    }

    pub async fn delete(&self, key: &str) -> Result<Enqueued> {
        self.store().enqueue_delete(&self.name, key).await
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn get(&self, key: &str) -> Result<Option<T>> {
        self.store()
            .get(&self.name, key)
            .await?
            .map(|record| from_record(&record))
            .transpose()
    }

    /// Live documents matching `predicate`, ordered by key.
    pub async fn query(&self, predicate: &Predicate) -> Result<Vec<T>> {
        self.store()
            .query(&self.name, predicate)
            .await?
            .iter()
            .map(from_record)
            .collect()
    }

    pub async fn all(&self) -> Result<Vec<T>> {
        self.query(&Predicate::All).await
    }

    /// The raw record, with version token, dirty flag and any staged remote.
    pub async fn record(&self, key: &str) -> Result<Option<Record>> {
        self.store().record(&self.name, key).await
    }

    /// Queued operations, in push order.
    pub async fn operations(&self) -> Result<Vec<Operation>> {
        self.store().operations(&self.name).await
    }

    pub async fn pending_count(&self) -> Result<usize> {
        self.store().pending_count(&self.name).await
    }

    pub async fn failed(&self) -> Result<Vec<Operation>> {
        self.store().failed(&self.name).await
    }

    // -----------------------------------------------------------------------
    // Sync
    // -----------------------------------------------------------------------

    pub async fn push(&self) -> Result<PushResult> {
        self.engine.push(&self.name).await
    }

    pub async fn pull(&self, query: &str, predicate: &Predicate) -> Result<PullResult> {
        self.engine.pull(&self.name, query, predicate).await
    }

    pub async fn sync(&self, query: &str, predicate: &Predicate) -> Result<SyncResult> {
        self.engine.sync(&self.name, query, predicate).await
    }
}

fn to_fields<T: Serialize>(doc: &T) -> Result<Fields> {
    match serde_json::to_value(doc) {
        Ok(serde_json::Value::Object(fields)) => Ok(fields),
        Ok(other) => Err(Error::InvalidPayload(format!(
            "document must serialize to an object, got {other}"
        ))),
        Err(e) => Err(Error::InvalidPayload(e.to_string())),
    }
}

fn from_record<T: DeserializeOwned>(record: &Record) -> Result<T> {
    serde_json::from_value(serde_json::Value::Object(record.fields.clone())).map_err(|e| {
        Error::InvalidPayload(format!("record {} does not decode: {e}", record.key))
    })
}
