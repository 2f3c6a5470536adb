use axum::extract::{Extension, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use forge_cache_core::{parse_content_range, CacheResponse};
use futures_util::TryStreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use crate::auth::Scopes;
use crate::error::WebError;
use crate::state::AppState;

/// Splits a comma-separated list, trimming whitespace and dropping empty
/// entries. Mirrors the original's `CleanStringSlice`.
fn clean_string_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn request_scheme(headers: &HeaderMap, default_scheme: &str) -> String {
    headers
        .get("X-Forwarded-Proto")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .unwrap_or(default_scheme)
        .to_string()
}

fn request_host(headers: &HeaderMap) -> String {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}

#[derive(Debug, Deserialize)]
pub struct SearchCacheQuery {
    keys: Option<String>,
    version: Option<String>,
}

pub async fn search_cache(
    State(state): State<AppState>,
    Path(repo): Path<String>,
    Extension(Scopes(scopes)): Extension<Scopes>,
    Query(query): Query<SearchCacheQuery>,
    headers: HeaderMap,
) -> axum::response::Response {
    let Some(key) = query.keys.filter(|k| !k.is_empty()) else {
        return bad_request("missing keys query parameter");
    };
    let Some(version) = query.version.filter(|v| !v.is_empty()) else {
        return bad_request("missing version query parameter");
    };

    let keys = clean_string_list(&key);
    let Some(primary_key) = keys.first() else {
        return bad_request("invalid keys");
    };

    let cache = match state
        .orchestrator
        .search_cache(&repo, primary_key, &version, &scopes, &keys)
        .await
    {
        Ok(cache) => cache,
        Err(err) => return WebError(err).into_response(),
    };

    let scheme = request_scheme(&headers, &state.default_scheme);
    let host = request_host(&headers);
    let archive_location = match state
        .orchestrator
        .archive_url(&scheme, &host, &repo, &cache.storage_backend_path)
        .await
    {
        Ok(url) => url,
        Err(err) => return WebError(err).into_response(),
    };

    let body: CacheResponse = cache.into_response(archive_location);
    (StatusCode::CREATED, Json(body)).into_response()
}

#[derive(Debug, Deserialize)]
pub struct StartCacheRequest {
    key: String,
    version: String,
}

#[derive(Debug, Serialize)]
pub struct StartCacheResponse {
    #[serde(rename = "cacheId")]
    cache_id: i64,
}

pub async fn start_cache(
    State(state): State<AppState>,
    Path(repo): Path<String>,
    Extension(Scopes(scopes)): Extension<Scopes>,
    Json(body): Json<StartCacheRequest>,
) -> axum::response::Response {
    match state
        .orchestrator
        .start_cache(&repo, &body.key, &body.version, &scopes)
        .await
    {
        Ok(cache_id) => {
            (StatusCode::CREATED, Json(StartCacheResponse { cache_id })).into_response()
        }
        Err(err) => WebError(err).into_response(),
    }
}

pub async fn upload_part(
    State(state): State<AppState>,
    Path((repo, cache_id)): Path<(String, i64)>,
    headers: HeaderMap,
    body: axum::body::Body,
) -> axum::response::Response {
    if cache_id < 0 {
        return bad_request("cacheId must be a positive integer");
    }

    let Some(content_range) = headers
        .get(header::CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
    else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "missing or invalid content-range header" })),
        )
            .into_response();
    };

    let parsed = match parse_content_range(content_range) {
        Ok(parsed) => parsed,
        Err(err) => return WebError(err).into_response(),
    };

    let reader: forge_cache_core::ByteStream =
        Box::pin(body.into_data_stream().map_err(std::io::Error::other));

    match state
        .orchestrator
        .upload_part(&repo, cache_id, reader, parsed.start, parsed.end)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => WebError(err).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct FinishCacheRequest {
    size: i64,
}

pub async fn finish_cache(
    State(state): State<AppState>,
    Path((repo, cache_id)): Path<(String, i64)>,
    Json(body): Json<FinishCacheRequest>,
) -> axum::response::Response {
    if cache_id < 0 {
        return bad_request("cacheId must be a positive integer");
    }

    match state
        .orchestrator
        .finish_cache(&repo, cache_id, body.size)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => WebError(err).into_response(),
    }
}

pub async fn archive_path(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> axum::response::Response {
    if state.orchestrator.blob_backend_type() != "disk" {
        return not_found();
    }

    let path = match state.orchestrator.archive_file_path(&key).await {
        Ok(path) => path,
        Err(forge_cache_core::CacheError::NotFound) => return not_found(),
        Err(err) => {
            error!(error = %err, "failed to resolve archive path");
            return WebError(err).into_response();
        }
    };

    let service = tower_http::services::ServeFile::new(path);
    let request = axum::http::Request::new(axum::body::Body::empty());
    match tower::ServiceExt::oneshot(service, request).await {
        Ok(response) => response.into_response(),
        Err(err) => {
            error!(error = %err, "failed to stream archive file");
            not_found()
        }
    }
}

pub async fn healthz() -> StatusCode {
    StatusCode::NO_CONTENT
}

pub async fn ping() -> &'static str {
    "pong"
}

fn bad_request(message: &str) -> axum::response::Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

fn not_found() -> axum::response::Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "file not found" })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_string_list_trims_and_drops_empties() {
        assert_eq!(
            clean_string_list(" foo ,bar,, baz "),
            vec!["foo".to_string(), "bar".to_string(), "baz".to_string()]
        );
    }

    #[test]
    fn clean_string_list_empty_input_yields_empty_vec() {
        assert!(clean_string_list("").is_empty());
        assert!(clean_string_list("   ").is_empty());
    }

    #[test]
    fn request_scheme_prefers_forwarded_header() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Forwarded-Proto", "https".parse().unwrap());
        assert_eq!(request_scheme(&headers, "http"), "https");
    }

    #[test]
    fn request_scheme_falls_back_to_default() {
        let headers = HeaderMap::new();
        assert_eq!(request_scheme(&headers, "http"), "http");
    }

    #[test]
    fn request_host_reads_host_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, "example.test".parse().unwrap());
        assert_eq!(request_host(&headers), "example.test");
    }
}
