//! Record storage for the remote: PostgreSQL, or memory for tests and demos.

mod operations;
mod pool;
mod records;

pub use operations::*;
pub use pool::*;
pub use records::*;

use crate::error::Result;
use ferry_engine::{
    OpKind, PageBuilder, PullPage, PullRequest, PushReply, PushRequest, RemoteRecord, RemoteStore,
};
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Where the remote keeps its records.
#[derive(Clone)]
pub enum Repository {
    Postgres(PgPool),
    Memory(Arc<Mutex<RemoteStore>>),
}

impl Repository {
    pub fn postgres(pool: PgPool) -> Self {
        Repository::Postgres(pool)
    }

    pub fn memory() -> Self {
        Repository::Memory(Arc::new(Mutex::new(RemoteStore::new())))
    }

    /// Apply one pushed operation.
    pub async fn push(&self, request: &PushRequest) -> Result<PushReply> {
        match self {
            Repository::Postgres(pool) => push_postgres(pool, request).await,
            Repository::Memory(store) => Ok(store.lock().await.push(request)),
        }
    }

    /// One page of a collection's changes.
    pub async fn pull(&self, collection: &str, request: &PullRequest) -> Result<PullPage> {
        match self {
            Repository::Postgres(pool) => pull_postgres(pool, collection, request).await,
            Repository::Memory(store) => Ok(store.lock().await.pull(collection, request)),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Repository::Postgres(_) => "postgres",
            Repository::Memory(_) => "memory",
        }
    }

    /// Check the backing store answers.
    pub async fn ping(&self) -> Result<()> {
        if let Repository::Postgres(pool) = self {
            sqlx::query("SELECT 1").execute(pool).await?;
        }
        Ok(())
    }
}

async fn push_postgres(pool: &PgPool, request: &PushRequest) -> Result<PushReply> {
    let mut tx = pool.begin().await?;

    // Serialize writers of the same record
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(format!("{}/{}", request.collection, request.key))
        .execute(&mut *tx)
        .await?;

    if let Some(applied) = find_applied(&mut tx, &request.op_id).await? {
        tracing::debug!(op_id = %request.op_id, "replayed operation");
        return Ok(PushReply::Accepted {
            version: applied.version,
            marker: applied.marker,
        });
    }

    let current = get_record(&mut tx, &request.collection, &request.key).await?;
    if !request.accepts(current.as_ref()) {
        tracing::debug!(
            op_id = %request.op_id,
            collection = %request.collection,
            key = %request.key,
            "version mismatch"
        );
        return Ok(PushReply::Conflict { current });
    }

    let applied = match (request.kind, current) {
        // Deleting something already gone changes nothing
        (OpKind::Delete, Some(existing)) if existing.deleted => AppliedOperation {
            version: existing.version,
            marker: existing.marker,
        },
        (kind, current) => {
            let marker = next_marker(&mut tx).await?;
            let deleted = kind == OpKind::Delete;
            let fields = if deleted {
                current.map(|record| record.fields).unwrap_or_default()
            } else {
                request.fields.clone().unwrap_or_default()
            };
            let record = RemoteRecord {
                key: request.key.clone(),
                fields,
                version: format!("v{marker}"),
                deleted,
                marker,
            };
            upsert_record(&mut tx, &request.collection, &record).await?;
            AppliedOperation {
                version: record.version,
                marker,
            }
        }
    };

    record_applied(&mut tx, request, &applied).await?;
    tx.commit().await?;

    Ok(PushReply::Accepted {
        version: applied.version,
        marker: applied.marker,
    })
}

async fn pull_postgres(pool: &PgPool, collection: &str, request: &PullRequest) -> Result<PullPage> {
    // One extra row tells whether anything follows a full page
    let batch = request.limit.max(1) as i64 + 1;
    let mut builder = PageBuilder::new(request);
    let mut since = request.since;

    loop {
        let records = get_records_since(pool, collection, since, batch).await?;
        let exhausted = (records.len() as i64) < batch;
        for record in &records {
            if !builder.offer(record) {
                return Ok(builder.finish());
            }
            since = record.marker;
        }
        if exhausted {
            return Ok(builder.finish());
        }
    }
}
