use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use forge_cache_core::CacheError;
use serde_json::json;

/// Wraps [`CacheError`] so it can be returned directly from axum handlers.
/// Maps the error taxonomy (spec.md §7) onto the documented status codes.
pub struct WebError(pub CacheError);

impl From<CacheError> for WebError {
    fn from(err: CacheError) -> Self {
        Self(err)
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            CacheError::CacheAlreadyExists => (StatusCode::BAD_REQUEST, self.0.to_string()),
            CacheError::NoCacheFound => (StatusCode::NO_CONTENT, String::new()),
            CacheError::CacheSizeMismatch => (StatusCode::BAD_REQUEST, self.0.to_string()),
            CacheError::CacheInvalidParts => (StatusCode::BAD_REQUEST, self.0.to_string()),
            // Preserved as-observed: the original surfaces a parse failure as
            // a 500, not a 400 (spec.md §9's documented quirk).
            CacheError::ContentRange => (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string()),
            CacheError::NotFound => (StatusCode::NOT_FOUND, self.0.to_string()),
            CacheError::NotImplemented => (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string()),
            CacheError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            CacheError::Internal(err) => {
                tracing::error!(error = %err, "internal error handling request");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };

        if status == StatusCode::NO_CONTENT {
            return status.into_response();
        }

        (status, Json(json!({ "error": message }))).into_response()
    }
}
