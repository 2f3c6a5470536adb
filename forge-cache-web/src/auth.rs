use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use forge_cache_auth::AuthError;
use forge_cache_core::Scope;
use serde_json::json;
use tracing::warn;

use crate::state::AppState;

/// The caller's scope list, attached to the request by [`require_auth`] and
/// read back out by the handlers it guards.
#[derive(Clone)]
pub struct Scopes(pub Vec<Scope>);

/// Middleware guarding the `/{repo}/_apis/artifactcache/*` routes (C5). Rejects
/// before the orchestrator is ever reached when no usable bearer token is
/// present, per spec.md §4.5.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let header_value = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    match state.auth.validate(header_value.as_deref()).await {
        Ok(scopes) => {
            req.extensions_mut().insert(Scopes(scopes));
            next.run(req).await
        }
        Err(err) => {
            warn!(error = %err, "rejected request: auth failed");
            auth_error_response(err)
        }
    }
}

fn auth_error_response(err: AuthError) -> Response {
    let status = match err {
        AuthError::MissingHeader | AuthError::MalformedHeader => StatusCode::BAD_REQUEST,
        AuthError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
    };
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}
