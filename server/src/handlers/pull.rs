//! Pull handler - serves a page of a collection's changes.

use crate::db::Repository;
use crate::error::{AppError, Result};
use ferry_engine::{ChangeMarker, Predicate, PullPage, PullRequest};
use serde::Deserialize;

/// Query parameters for the change feed.
#[derive(Debug, Default, Deserialize)]
pub struct PullQuery {
    /// Return changes after this marker
    pub since: Option<ChangeMarker>,
    /// Maximum records to return
    pub limit: Option<usize>,
    /// JSON encoded predicate
    pub filter: Option<String>,
}

/// Build a pull request from query parameters.
pub fn parse_pull_query(query: PullQuery, max_limit: usize) -> Result<PullRequest> {
    let filter = match query.filter.as_deref() {
        None | Some("") => Predicate::All,
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| AppError::BadRequest(format!("invalid filter: {e}")))?,
    };

    Ok(PullRequest {
        since: query.since.unwrap_or(0),
        limit: query
            .limit
            .unwrap_or(PullRequest::DEFAULT_LIMIT)
            .clamp(1, max_limit.max(1)),
        filter,
    })
}

/// Process a pull request from a client.
pub async fn handle_pull(
    repo: &Repository,
    collection: &str,
    request: &PullRequest,
) -> Result<PullPage> {
    let page = repo.pull(collection, request).await?;
    tracing::debug!(
        collection,
        since = request.since,
        returned = page.records.len(),
        next_cursor = page.next_cursor,
        end = page.end,
        "served changes"
    );
    Ok(page)
}
