use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;

use crate::error::CacheResult;
use crate::model::{Cache, CachePart, Scope};

/// Stream of bytes making up a request or part body.
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// The blob storage contract (C2). Every storage backend — local disk,
/// S3-compatible object store, or a future one — implements this.
///
/// `repository` scopes every operation so that multi-tenant layouts (e.g.
/// the S3 backend's `<prefix>/<repo>/<uuid>` keying) stay isolated per repo.
#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// Streams `reader` into a freshly allocated, opaquely-named blob.
    /// Returns the backend-assigned handle and the number of bytes actually
    /// persisted — the orchestrator compares this against `declared_size`.
    async fn write(
        &self,
        repository: &str,
        reader: ByteStream,
        start: i64,
        end: i64,
        declared_size: i64,
    ) -> CacheResult<WriteOutcome>;

    /// Best-effort, idempotent removal. Errors are logged, never surfaced.
    async fn delete(&self, repository: &str, part_handle: &str);

    /// Concatenates `parts` (already ordered by `start` ascending) into one
    /// opaque artifact and returns its path. Any partially constructed
    /// artifact is removed on failure; already-written parts may survive for
    /// a retried finalise.
    async fn finalise(&self, repository: &str, parts: &[CachePart]) -> CacheResult<String>;

    /// Produces a URL the client can `GET` the finished artifact from.
    async fn generate_archive_url(
        &self,
        scheme: &str,
        host: &str,
        repository: &str,
        artifact_path: &str,
    ) -> CacheResult<String>;

    /// Resolves an opaque archive key to a local filesystem path, rejecting
    /// any key that would escape the backend's base directory. Only the
    /// local-disk backend supports this; others return `NotImplemented`.
    async fn get_file_path(&self, key: &str) -> CacheResult<std::path::PathBuf>;

    /// Stable short identifier (`"disk"`, `"s3"`, ...).
    fn backend_type(&self) -> &'static str;
}

/// Outcome of a single `BlobBackend::write` call.
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub part_handle: String,
    pub bytes_written: i64,
}

/// The metadata storage contract (C3). Relational backends (sqlite,
/// postgres) implement this; it owns uniqueness, part ordering and
/// contiguity validation.
#[async_trait]
pub trait MetadataBackend: Send + Sync {
    /// Inserts a new unfinished cache row under `scopes[0]`. `cache_id` is
    /// allocated as `max(cache_id) + 1` within the repository (or `1` for
    /// the first). Fails with `CacheError::CacheAlreadyExists` when
    /// `(repository, scope, key, version)` already exists among finished
    /// caches.
    async fn create_cache(
        &self,
        repository: &str,
        key: &str,
        version: &str,
        scopes: &[Scope],
        storage_backend_type: &str,
    ) -> CacheResult<i64>;

    /// Appends a part row. No ordering is enforced here — ordering is
    /// reconstructed at validation time.
    async fn add_upload_part(
        &self,
        repository: &str,
        cache_id: i64,
        part: CachePart,
    ) -> CacheResult<()>;

    /// Returns the parts ordered by `start` ascending, having checked:
    /// contiguity from zero (`CacheInvalidParts` on violation) and total
    /// size against `declared_size` (`CacheSizeMismatch` on violation).
    async fn validate_upload(
        &self,
        repository: &str,
        cache_id: i64,
        declared_size: i64,
    ) -> CacheResult<Vec<CachePart>>;

    /// Marks the cache finished and records `artifact_path`.
    async fn finish_cache(
        &self,
        repository: &str,
        cache_id: i64,
        artifact_path: &str,
    ) -> CacheResult<()>;

    /// Exact match on `(repository, scopes[0], primary_key, version)`,
    /// falling back to a restore-key prefix scan across `scopes` in order.
    /// Returns `CacheError::NoCacheFound` when nothing matches either phase.
    async fn search_cache(
        &self,
        repository: &str,
        primary_key: &str,
        version: &str,
        scopes: &[Scope],
        restore_keys: &[String],
    ) -> CacheResult<Cache>;

    /// Stable short identifier (`"sqlite"`, `"postgres"`, ...).
    fn backend_type(&self) -> &'static str;
}
