//! Integration tests for the read-mostly HTTP catalog surface (§6), driven
//! in-process via `tower::ServiceExt::oneshot` against the real axum router
//! — no socket involved, following the teacher's preference for testing the
//! `Router` directly over its handlers.

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use tower::ServiceExt;

use termgate::config::Config;
use termgate::server::Server;

async fn test_server(data_dir: &std::path::Path) -> Server {
    let mut config = Config::default();
    config.persistence.data_dir = data_dir.to_path_buf();
    Server::new(&config).await.expect("server construction")
}

fn body_json(bytes: axum::body::Bytes) -> serde_json::Value {
    serde_json::from_slice(&bytes).expect("valid json body")
}

#[tokio::test]
async fn health_reports_zero_terminals_initially() {
    let dir = tempfile::tempdir().unwrap();
    let server = test_server(dir.path()).await;
    let router = server.router();

    let response = router
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = body_json(body);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["terminals"], 0);
}

#[tokio::test]
async fn container_images_round_trip_through_add_list_delete() {
    let dir = tempfile::tempdir().unwrap();
    let server = test_server(dir.path()).await;
    let router = server.router();

    let add = router
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/api/container-images")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"image":"alpine:latest"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(add.status(), StatusCode::OK);

    let list = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/container-images")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = axum::body::to_bytes(list.into_body(), usize::MAX).await.unwrap();
    let json = body_json(body);
    assert_eq!(json["images"][0], "alpine:latest");

    let delete = router
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::DELETE)
                .uri("/api/container-images/alpine:latest")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(delete.status(), StatusCode::OK);

    let list_after = router
        .oneshot(
            Request::builder()
                .uri("/api/container-images")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = axum::body::to_bytes(list_after.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = body_json(body);
    assert_eq!(json["images"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn container_images_persist_across_a_fresh_load() {
    let dir = tempfile::tempdir().unwrap();
    {
        let server = test_server(dir.path()).await;
        server.remembered_images.remember("busybox".to_string()).await;
    }

    let reloaded = test_server(dir.path()).await;
    assert_eq!(reloaded.remembered_images.list(), vec!["busybox".to_string()]);
}

#[tokio::test]
async fn kubectl_contexts_never_errors_when_tool_is_absent() {
    let dir = tempfile::tempdir().unwrap();
    let server = test_server(dir.path()).await;
    let router = server.router();

    let response = router
        .oneshot(
            Request::builder()
                .uri("/api/kubectl-contexts")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}
