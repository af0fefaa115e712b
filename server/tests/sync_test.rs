//! Integration tests for the sync protocol over HTTP.
//!
//! Each test serves the router on an ephemeral port with the in-memory
//! repository and syncs real clients against it.

use ferry_client::{HttpRemote, LocalStore, Remote, SyncEngine};
use ferry_engine::{
    CollectionSchema, ErrorKind, FieldDef, FieldType, Fields, OpKind, Predicate, PullRequest,
    PushReply, PushRequest, Schema,
};
use ferry_server::config::Config;
use ferry_server::db::Repository;
use ferry_server::{app, AppState};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Serve a fresh in-memory server and return its base URL.
async fn spawn_server() -> String {
    let state = AppState {
        repo: Repository::memory(),
        config: Arc::new(Config::default()),
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app(state)).await.unwrap();
    });
    format!("http://{addr}")
}

fn schema() -> Schema {
    Schema::new().with_collection(CollectionSchema::new(
        "todos",
        vec![
            FieldDef::required("text", FieldType::String),
            FieldDef::required("complete", FieldType::Bool),
        ],
    ))
}

fn fields(value: serde_json::Value) -> Fields {
    value.as_object().cloned().unwrap()
}

async fn client(url: &str) -> SyncEngine {
    let store = Arc::new(LocalStore::open_in_memory(schema()).await.unwrap());
    let remote = HttpRemote::new(url, Duration::from_secs(5)).unwrap();
    SyncEngine::new(store, Arc::new(remote))
}

#[cfg(test)]
mod protocol_tests {
    use super::*;

    #[tokio::test]
    async fn test_push_reply_over_http() {
        let url = spawn_server().await;
        let remote = HttpRemote::new(&url, Duration::from_secs(5)).unwrap();
        let insert = PushRequest {
            op_id: "device-1:1".into(),
            kind: OpKind::Insert,
            collection: "todos".into(),
            key: "todo-1".into(),
            fields: Some(fields(json!({"text": "milk", "complete": false}))),
            base_version: None,
        };

        let accepted = remote.push(&insert).await.unwrap();
        let PushReply::Accepted { version, .. } = accepted.clone() else {
            panic!("expected acceptance, got {accepted:?}");
        };

        // Replay is idempotent
        assert_eq!(remote.push(&insert).await.unwrap(), accepted);

        // A second insert from another device conflicts and carries the current record
        let other = PushRequest {
            op_id: "device-2:1".into(),
            ..insert.clone()
        };
        match remote.push(&other).await.unwrap() {
            PushReply::Conflict { current } => {
                assert_eq!(current.unwrap().version, version);
            }
            reply => panic!("expected conflict, got {reply:?}"),
        }
    }

    #[tokio::test]
    async fn test_pull_over_http() {
        let url = spawn_server().await;
        let remote = HttpRemote::new(&url, Duration::from_secs(5)).unwrap();
        for i in 0..3 {
            remote
                .push(&PushRequest {
                    op_id: format!("device-1:{i}"),
                    kind: OpKind::Insert,
                    collection: "todos".into(),
                    key: format!("todo-{i}"),
                    fields: Some(fields(json!({"text": "x", "complete": i == 1}))),
                    base_version: None,
                })
                .await
                .unwrap();
        }

        let page = remote
            .pull(
                "todos",
                &PullRequest {
                    since: 0,
                    limit: 10,
                    filter: Predicate::eq("complete", true),
                },
            )
            .await
            .unwrap();

        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].key, "todo-1");
        assert_eq!(page.next_cursor, 3);
        assert!(page.end);
    }

    #[tokio::test]
    async fn test_unknown_route_is_configuration_error() {
        let url = spawn_server().await;
        let remote = HttpRemote::new(&format!("{url}/nowhere/"), Duration::from_secs(5)).unwrap();

        let err = remote
            .pull("todos", &PullRequest::default())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}

#[cfg(test)]
mod sync_tests {
    use super::*;

    #[tokio::test]
    async fn test_two_devices_converge() {
        let url = spawn_server().await;
        let alice = client(&url).await;
        let bob = client(&url).await;

        alice
            .store()
            .enqueue_insert("todos", "1", fields(json!({"text": "milk", "complete": false})))
            .await
            .unwrap();
        alice.sync("todos", "all", &Predicate::All).await.unwrap();
        bob.sync("todos", "all", &Predicate::All).await.unwrap();

        let record = bob.store().get("todos", "1").await.unwrap().unwrap();
        assert_eq!(record.fields["text"], "milk");
        assert!(!record.dirty);

        bob.store()
            .enqueue_update("todos", "1", fields(json!({"text": "milk", "complete": true})))
            .await
            .unwrap();
        bob.sync("todos", "all", &Predicate::All).await.unwrap();
        alice.sync("todos", "all", &Predicate::All).await.unwrap();

        let record = alice.store().get("todos", "1").await.unwrap().unwrap();
        assert_eq!(record.fields["complete"], true);
        assert_eq!(
            record.version,
            bob.store().get("todos", "1").await.unwrap().unwrap().version
        );
    }

    #[tokio::test]
    async fn test_conflict_over_http() {
        let url = spawn_server().await;
        let alice = client(&url).await;
        let bob = client(&url).await;

        alice
            .store()
            .enqueue_insert("todos", "1", fields(json!({"text": "milk", "complete": false})))
            .await
            .unwrap();
        alice.push("todos").await.unwrap();
        bob.pull("todos", "all", &Predicate::All).await.unwrap();

        alice
            .store()
            .enqueue_update("todos", "1", fields(json!({"text": "oat milk", "complete": false})))
            .await
            .unwrap();
        bob.store()
            .enqueue_update("todos", "1", fields(json!({"text": "whole milk", "complete": false})))
            .await
            .unwrap();
        alice.push("todos").await.unwrap();

        let err = bob.push("todos").await.unwrap_err();
        let conflict = err.conflict().unwrap();
        assert_eq!(conflict.remote.as_ref().unwrap().fields["text"], "oat milk");
        assert_eq!(conflict.local.as_ref().unwrap().fields["text"], "whole milk");
        assert_eq!(bob.store().failed("todos").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_propagates() {
        let url = spawn_server().await;
        let alice = client(&url).await;
        let bob = client(&url).await;

        alice
            .store()
            .enqueue_insert("todos", "1", fields(json!({"text": "milk", "complete": false})))
            .await
            .unwrap();
        alice.sync("todos", "all", &Predicate::All).await.unwrap();
        bob.sync("todos", "all", &Predicate::All).await.unwrap();

        alice.store().enqueue_delete("todos", "1").await.unwrap();
        alice.sync("todos", "all", &Predicate::All).await.unwrap();
        let pulled = bob.sync("todos", "all", &Predicate::All).await.unwrap();

        assert_eq!(pulled.pull.purged, 1);
        assert!(bob.store().record("todos", "1").await.unwrap().is_none());
        assert!(alice.store().record("todos", "1").await.unwrap().is_none());
    }
}
