use std::time::Instant;

use axum::extract::{MatchedPath, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use once_cell::sync::Lazy;
use prometheus::{Encoder, HistogramVec, IntCounterVec, Registry, TextEncoder};

use crate::state::AppState;

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        prometheus::Opts::new(
            "http_requests_total",
            "How many HTTP requests processed, partitioned by status code and method",
        ),
        &["code", "method", "path"],
    )
    .expect("metric options are valid");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("metric is registered exactly once");
    counter
});

static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let histogram = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "http_request_duration_seconds",
            "The HTTP request latencies in seconds",
        ),
        &["code", "method", "path"],
    )
    .expect("metric options are valid");
    REGISTRY
        .register(Box::new(histogram.clone()))
        .expect("metric is registered exactly once");
    histogram
});

/// Records request count/latency keyed by the matched route template, not the
/// raw URL, so per-cache-id/per-key paths don't blow up label cardinality.
/// Must be installed with `.route_layer()`, not `.layer()` — only after route
/// matching has the `MatchedPath` extension been inserted.
pub async fn track_metrics(
    State(_state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let method = req.method().to_string();
    let start = Instant::now();

    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    let elapsed = start.elapsed().as_secs_f64();

    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&status, &method, &path])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[&status, &method, &path])
        .observe(elapsed);

    response
}

async fn serve_metrics() -> Response {
    let metric_families = REGISTRY.gather();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %err, "failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    ([(axum::http::header::CONTENT_TYPE, encoder.format_type())], buffer).into_response()
}

/// Standalone router served on its own listen address (`METRICS_LISTEN_ADDR`),
/// mirroring the original's separate `metrics.Server` goroutine.
pub fn metrics_router() -> Router {
    Router::new().route("/metrics", get(serve_metrics))
}
