//! HTTP transport for `ferry-server`.
//!
//! - `POST {base}/collections/{collection}/records/{key}` with a
//!   [`PushRequest`] body answers a [`PushReply`]; a conflict comes back as
//!   `409` with the same body shape.
//! - `GET {base}/collections/{collection}/changes?since=&limit=&filter=`
//!   answers a [`PullPage`]. `filter` is the JSON encoded predicate.

use super::Remote;
use crate::error::{transport, Result};
use async_trait::async_trait;
use ferry_engine::{Error, PullPage, PullRequest, PushReply, PushRequest};
use reqwest::{Client, StatusCode, Url};
use std::time::Duration;

/// Remote reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
    base: Url,
}

impl HttpRemote {
    /// Create a transport for `base_url`.
    ///
    /// A URL that does not parse, or cannot carry a path, is a configuration error.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| Error::Configuration(format!("invalid remote url {base_url:?}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(Error::Configuration(format!(
                "remote url {base_url:?} cannot carry a path"
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(transport)?;

        Ok(Self { client, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| {
                Error::Configuration(format!("remote url {} cannot carry a path", self.base))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

/// Map a response status that carries no usable body.
fn unexpected(status: StatusCode, body: String) -> Error {
    let message = format!("remote answered {status}: {body}");
    match status {
        StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY => {
            Error::Configuration(message)
        }
        _ => Error::Transport(message),
    }
}

#[async_trait]
impl Remote for HttpRemote {
    async fn push(&self, request: &PushRequest) -> Result<PushReply> {
        let url = self.endpoint(&["collections", &request.collection, "records", &request.key])?;
        tracing::debug!(op_id = %request.op_id, %url, "pushing operation");

        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if status.is_success() || status == StatusCode::CONFLICT {
            return response.json::<PushReply>().await.map_err(transport);
        }
        let body = response.text().await.unwrap_or_default();
        Err(unexpected(status, body))
    }

    async fn pull(&self, collection: &str, request: &PullRequest) -> Result<PullPage> {
        let url = self.endpoint(&["collections", collection, "changes"])?;
        let filter = serde_json::to_string(&request.filter)
            .map_err(|e| Error::InvalidPayload(e.to_string()))?;
        tracing::debug!(
            collection,
            since = request.since,
            limit = request.limit,
            "pulling changes"
        );

        let response = self
            .client
            .get(url)
            .query(&[
                ("since", request.since.to_string()),
                ("limit", request.limit.to_string()),
                ("filter", filter),
            ])
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(unexpected(status, body));
        }
        response.json::<PullPage>().await.map_err(transport)
    }
}
