//! Push handler - applies one operation sent by a client.

use crate::db::Repository;
use crate::error::{AppError, Result};
use ferry_engine::{OpKind, PushReply, PushRequest};

/// Apply a pushed operation addressed to `collection`/`key`.
///
/// The body may leave out the record address; when present it must match the path.
pub async fn handle_push(
    repo: &Repository,
    collection: &str,
    key: &str,
    mut request: PushRequest,
) -> Result<PushReply> {
    if request.collection.is_empty() {
        request.collection = collection.to_string();
    }
    if request.key.is_empty() {
        request.key = key.to_string();
    }
    if request.collection != collection || request.key != key {
        return Err(AppError::BadRequest(format!(
            "body addresses {}/{} but path is {collection}/{key}",
            request.collection, request.key
        )));
    }
    if request.op_id.is_empty() {
        return Err(AppError::BadRequest("opId is required".to_string()));
    }
    if request.kind != OpKind::Delete && request.fields.is_none() {
        return Err(AppError::BadRequest(format!(
            "{} requires fields",
            request.kind
        )));
    }

    let reply = repo.push(&request).await?;
    match &reply {
        PushReply::Accepted { version, marker } => tracing::debug!(
            op_id = %request.op_id,
            collection,
            key,
            %version,
            marker,
            "operation accepted"
        ),
        PushReply::Conflict { .. } => tracing::info!(
            op_id = %request.op_id,
            collection,
            key,
            base = ?request.base_version,
            "operation rejected"
        ),
    }
    Ok(reply)
}
