//! HTTP route definitions.

mod collections;
mod health;

use crate::AppState;
use axum::Router;

/// Create all application routes.
pub fn create_routes() -> Router<AppState> {
    Router::new()
        .merge(health::routes())
        .merge(collections::routes())
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::db::Repository;
    use crate::{app, AppState};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn router() -> Router {
        app(AppState {
            repo: Repository::memory(),
            config: Arc::new(Config::default()),
        })
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn push(collection: &str, key: &str, body: Value) -> Request<Body> {
        Request::post(format!("/collections/{collection}/records/{key}"))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn changes(query: &str) -> Request<Body> {
        Request::get(format!("/collections/todos/changes{query}"))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (status, body) = send(
            &router(),
            Request::get("/health").body(Body::empty()).unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn insert_then_conflicting_insert() {
        let router = router();
        let insert = |op_id: &str, text: &str| {
            push(
                "todos",
                "1",
                json!({
                    "opId": op_id,
                    "kind": "insert",
                    "collection": "todos",
                    "key": "1",
                    "fields": {"text": text}
                }),
            )
        };

        let (status, body) = send(&router, insert("a:1", "milk")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "accepted");
        let version = body["version"].clone();

        // Replay returns the original acceptance
        let (status, body) = send(&router, insert("a:1", "milk")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"], version);

        let (status, body) = send(&router, insert("b:1", "eggs")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["status"], "conflict");
        assert_eq!(body["current"]["fields"]["text"], "milk");
        assert_eq!(body["current"]["version"], version);
    }

    #[tokio::test]
    async fn path_and_body_must_agree() {
        let (status, body) = send(
            &router(),
            push(
                "todos",
                "2",
                json!({"opId": "a:1", "kind": "delete", "collection": "todos", "key": "1"}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("todos/1"));
    }

    #[tokio::test]
    async fn changes_are_paged_and_filtered() {
        let router = router();
        for (i, complete) in [false, true, false].into_iter().enumerate() {
            let key = i.to_string();
            send(
                &router,
                push(
                    "todos",
                    &key,
                    json!({
                        "opId": format!("a:{i}"),
                        "kind": "insert",
                        "collection": "todos",
                        "key": key,
                        "fields": {"complete": complete}
                    }),
                ),
            )
            .await;
        }

        let (status, page) = send(&router, changes("?since=0&limit=2")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["records"].as_array().unwrap().len(), 2);
        assert_eq!(page["nextCursor"], 2);
        assert_eq!(page["end"], false);

        // filter={"op":"eq","field":"complete","value":false}
        let query = "?filter=%7B%22op%22%3A%22eq%22%2C%22field%22%3A%22complete%22%2C%22value%22%3Afalse%7D";
        let (status, page) = send(&router, changes(query)).await;
        assert_eq!(status, StatusCode::OK);
        let keys: Vec<_> = page["records"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["key"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(keys, ["0", "2"]);
        assert_eq!(page["end"], true);
    }

    #[tokio::test]
    async fn record_address_may_come_from_the_path() {
        let (status, body) = send(
            &router(),
            push(
                "todos",
                "7",
                json!({"opId": "a:1", "kind": "insert", "fields": {"text": "milk"}}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "accepted");
    }

    #[tokio::test]
    async fn malformed_filter_is_rejected() {
        let (status, _) = send(&router(), changes("?filter=nope")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
