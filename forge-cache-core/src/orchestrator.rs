use std::sync::Arc;

use tracing::warn;

use crate::backend::{BlobBackend, ByteStream, MetadataBackend};
use crate::error::{CacheError, CacheResult};
use crate::model::{Cache, CachePart, Scope};

/// Coordinates the blob and metadata backends through the cache protocol's
/// four operations (C4). Neither backend knows about the other; this is the
/// only place their writes are sequenced.
///
/// There are no distributed transactions here: every multi-step operation
/// writes the blob side first and the metadata side second, deleting the
/// blob on metadata failure. A crash between the two steps leaves an orphan
/// blob, never a metadata row pointing at nothing.
pub struct CacheOrchestrator {
    blob: Arc<dyn BlobBackend>,
    metadata: Arc<dyn MetadataBackend>,
}

impl CacheOrchestrator {
    pub fn new(blob: Arc<dyn BlobBackend>, metadata: Arc<dyn MetadataBackend>) -> Self {
        Self { blob, metadata }
    }

    /// Opens a new upload. Fails with `CacheAlreadyExists` when the key and
    /// version are already finished within the primary scope.
    pub async fn start_cache(
        &self,
        repository: &str,
        key: &str,
        version: &str,
        scopes: &[Scope],
    ) -> CacheResult<i64> {
        if scopes.is_empty() {
            return Err(CacheError::invalid("at least one scope is required"));
        }
        self.metadata
            .create_cache(repository, key, version, scopes, self.blob.backend_type())
            .await
    }

    /// Writes one chunk of the upload and records its position. `start`/`end`
    /// are inclusive byte offsets, as carried by the `Content-Range` header.
    pub async fn upload_part(
        &self,
        repository: &str,
        cache_id: i64,
        reader: ByteStream,
        start: i64,
        end: i64,
    ) -> CacheResult<()> {
        if start < 0 || end < start {
            return Err(CacheError::invalid("part range is not well-formed"));
        }
        let declared_size = CachePart::declared_size(start, end);

        let outcome = self
            .blob
            .write(repository, reader, start, end, declared_size)
            .await?;

        if outcome.bytes_written != declared_size {
            self.blob.delete(repository, &outcome.part_handle).await;
            // Not `CacheSizeMismatch` — that kind is reserved for FinishCache's
            // declared-vs-stored-sum check. A truncated part write is a storage
            // failure, surfaced as an internal error (500), matching the original.
            return Err(CacheError::internal(anyhow::anyhow!(
                "calculated size vs bytes written mismatch"
            )));
        }

        let part = CachePart {
            start,
            end,
            size: outcome.bytes_written,
            part_handle: outcome.part_handle.clone(),
        };

        if let Err(err) = self
            .metadata
            .add_upload_part(repository, cache_id, part)
            .await
        {
            self.blob.delete(repository, &outcome.part_handle).await;
            return Err(err);
        }

        Ok(())
    }

    /// Validates the uploaded parts are contiguous from zero and sum to
    /// `declared_size`, assembles them into the finished artifact, and marks
    /// the cache finished. On any failure past validation, the
    /// partially-assembled artifact (if any) is removed.
    pub async fn finish_cache(
        &self,
        repository: &str,
        cache_id: i64,
        declared_size: i64,
    ) -> CacheResult<()> {
        let parts = self
            .metadata
            .validate_upload(repository, cache_id, declared_size)
            .await?;

        let artifact_path = match self.blob.finalise(repository, &parts).await {
            Ok(path) => path,
            Err(err) => {
                return Err(err);
            }
        };

        if let Err(err) = self
            .metadata
            .finish_cache(repository, cache_id, &artifact_path)
            .await
        {
            warn!(
                repository,
                cache_id, "finalised artifact left orphaned after finish_cache failure"
            );
            return Err(err);
        }

        Ok(())
    }

    /// Looks up a finished cache by exact key, falling back to a restore-key
    /// prefix scan. Returns `NoCacheFound` when neither phase matches, or
    /// when the match was written by a storage backend other than the one
    /// currently configured — its artifact path can't be resolved here.
    pub async fn search_cache(
        &self,
        repository: &str,
        primary_key: &str,
        version: &str,
        scopes: &[Scope],
        restore_keys: &[String],
    ) -> CacheResult<Cache> {
        let cache = self
            .metadata
            .search_cache(repository, primary_key, version, scopes, restore_keys)
            .await?;

        if cache.storage_backend_type != self.blob.backend_type() {
            return Err(CacheError::NoCacheFound);
        }

        Ok(cache)
    }

    /// Resolves a found cache's artifact to a client-fetchable URL.
    pub async fn archive_url(
        &self,
        scheme: &str,
        host: &str,
        repository: &str,
        artifact_path: &str,
    ) -> CacheResult<String> {
        self.blob
            .generate_archive_url(scheme, host, repository, artifact_path)
            .await
    }

    /// The configured blob backend's stable tag (`"disk"`, `"s3"`, ...). The
    /// archive endpoint (C6) uses this to refuse serving on any backend other
    /// than local disk before ever touching `key`.
    pub fn blob_backend_type(&self) -> &'static str {
        self.blob.backend_type()
    }

    /// Resolves an archive key to a local path via the blob backend's
    /// path-traversal guard. Only meaningful when `blob_backend_type() ==
    /// "disk"`; other backends return `NotImplemented`.
    pub async fn archive_file_path(&self, key: &str) -> CacheResult<std::path::PathBuf> {
        self.blob.get_file_path(key).await
    }
}
