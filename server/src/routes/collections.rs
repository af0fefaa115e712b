//! Collection endpoint routes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use ferry_engine::{PullPage, PushReply, PushRequest};

use crate::error::Result;
use crate::handlers::{handle_pull, handle_push, parse_pull_query, PullQuery};
use crate::AppState;

/// Create collection routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/collections/{collection}/records/{key}", post(push_handler))
        .route("/collections/{collection}/changes", get(pull_handler))
}

/// POST /collections/{collection}/records/{key} - apply one operation.
///
/// A version mismatch answers 409 with the remote's current record.
async fn push_handler(
    State(state): State<AppState>,
    Path((collection, key)): Path<(String, String)>,
    Json(request): Json<PushRequest>,
) -> Result<(StatusCode, Json<PushReply>)> {
    let reply = handle_push(&state.repo, &collection, &key, request).await?;
    let status = match reply {
        PushReply::Accepted { .. } => StatusCode::OK,
        PushReply::Conflict { .. } => StatusCode::CONFLICT,
    };
    Ok((status, Json(reply)))
}

/// GET /collections/{collection}/changes - a page of changes after a cursor.
async fn pull_handler(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Query(query): Query<PullQuery>,
) -> Result<Json<PullPage>> {
    let request = parse_pull_query(query, state.config.max_pull_limit)?;
    let page = handle_pull(&state.repo, &collection, &request).await?;
    Ok(Json(page))
}
