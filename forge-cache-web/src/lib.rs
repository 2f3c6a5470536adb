pub mod auth;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod state;

use axum::http::{HeaderName, HeaderValue, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

pub use metrics::metrics_router;
pub use state::AppState;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Stamps every request/response pair with an `X-Request-Id`, generating one
/// when the client didn't supply it. Ties request-scoped log lines together.
async fn ensure_request_id(mut req: Request<axum::body::Body>, next: Next) -> Response {
    let header_name = HeaderName::from_static(REQUEST_ID_HEADER);
    let request_id = req
        .headers()
        .get(&header_name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        req.headers_mut().insert(header_name.clone(), value);
    }

    let mut response = next.run(req).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(header_name, value);
    }

    response
}

/// Assembles the full HTTP surface (spec.md §6): the unauthenticated
/// `/healthz`, `/ping` and `/archive/{key}` routes, and the
/// `/{repo}/_apis/artifactcache/*` group guarded by [`auth::require_auth`].
///
/// Request-id stamping and access-log tracing apply to every route.
/// Per-route metrics are attached with `route_layer` so the
/// [`axum::extract::MatchedPath`] extractor used by [`metrics::track_metrics`]
/// sees the matched template rather than raw query data.
pub fn build_router(state: AppState) -> Router {
    let authed = Router::new()
        .route(
            "/_apis/artifactcache/cache",
            get(handlers::search_cache),
        )
        .route(
            "/_apis/artifactcache/caches",
            post(handlers::start_cache),
        )
        .route(
            "/_apis/artifactcache/caches/{cacheid}",
            patch(handlers::upload_part).post(handlers::finish_cache),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/ping", get(handlers::ping))
        .route("/archive/{key}", get(handlers::archive_path))
        .nest("/{repo}", authed)
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            metrics::track_metrics,
        ))
        .layer(middleware::from_fn(ensure_request_id))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
