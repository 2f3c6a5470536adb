use thiserror::Error;

/// Result type for cache core operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// The error taxonomy shared by both backend families and the orchestrator.
///
/// Each variant maps to exactly one externally-visible HTTP outcome; see
/// `forge-cache-web::error` for the status code mapping.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache already exists")]
    CacheAlreadyExists,

    #[error("no cache found")]
    NoCacheFound,

    #[error("cache size mismatch")]
    CacheSizeMismatch,

    #[error("cache has invalid parts")]
    CacheInvalidParts,

    #[error("invalid content-range header")]
    ContentRange,

    #[error("not found")]
    NotFound,

    #[error("not implemented")]
    NotImplemented,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CacheError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn internal(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Internal(anyhow::Error::new(error))
    }
}
