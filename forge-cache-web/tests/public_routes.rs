use std::sync::Arc;

use forge_cache_auth::AuthValidator;
use forge_cache_core::CacheOrchestrator;
use forge_cache_db::sqlite::SqliteBackend;
use forge_cache_storage::disk::DiskBackend;
use forge_cache_web::{build_router, AppState};
use http_body_util::BodyExt;
use tower::ServiceExt;

async fn test_state(disk_dir: &std::path::Path) -> AppState {
    let metadata = SqliteBackend::connect("sqlite::memory:").await.unwrap();
    let blob = DiskBackend::connect(disk_dir).await.unwrap();
    let orchestrator = CacheOrchestrator::new(Arc::new(blob), Arc::new(metadata));
    let auth = AuthValidator::new(true);
    AppState::new(Arc::new(orchestrator), Arc::new(auth), "http")
}

#[tokio::test]
async fn healthz_returns_204() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path()).await;
    let router = build_router(state);

    let request = axum::http::Request::builder()
        .uri("/healthz")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn ping_returns_pong() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path()).await;
    let router = build_router(state);

    let request = axum::http::Request::builder()
        .uri("/ping")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"pong");
}

#[tokio::test]
async fn archive_path_serves_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    tokio::fs::write(dir.path().join("some-artifact"), b"archive bytes")
        .await
        .unwrap();
    let state = test_state(dir.path()).await;
    let router = build_router(state);

    let request = axum::http::Request::builder()
        .uri("/archive/some-artifact")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"archive bytes");
}

#[tokio::test]
async fn archive_path_rejects_traversal_with_404() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path()).await;
    let router = build_router(state);

    let request = axum::http::Request::builder()
        .uri("/archive/missing-key")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn authed_route_without_bearer_token_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path()).await;
    let router = build_router(state);

    let request = axum::http::Request::builder()
        .uri("/my-repo/_apis/artifactcache/cache?keys=foo&version=1")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
}
