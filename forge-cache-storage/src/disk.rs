use std::path::{Path, PathBuf};

use async_trait::async_trait;
use forge_cache_core::backend::{BlobBackend, ByteStream, WriteOutcome};
use forge_cache_core::error::{CacheError, CacheResult};
use forge_cache_core::model::CachePart;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;
use tracing::warn;

/// Stores every part and finished artifact as a UUID-named file directly
/// under `base_dir`. Parts and artifacts share a flat namespace, matching
/// the original implementation's single-directory layout.
pub struct DiskBackend {
    base_dir: PathBuf,
}

impl DiskBackend {
    /// `base_dir` must already exist; this mirrors the original backend's
    /// constructor, which rejects a missing path rather than creating it.
    pub async fn connect(base_dir: impl Into<PathBuf>) -> CacheResult<Self> {
        let base_dir = base_dir.into();
        let metadata = tokio::fs::metadata(&base_dir)
            .await
            .map_err(|_| CacheError::invalid("storage base directory does not exist"))?;
        if !metadata.is_dir() {
            return Err(CacheError::invalid("storage base directory is not a directory"));
        }
        Ok(Self { base_dir })
    }

    async fn write_stream_to(
        &self,
        path: &Path,
        mut reader: ByteStream,
    ) -> CacheResult<i64> {
        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(path)
            .await
            .map_err(|e| CacheError::internal(e))?;

        let mut stream_reader = StreamReader::new(&mut reader);
        let written = tokio::io::copy(&mut stream_reader, &mut file)
            .await
            .map_err(|e| CacheError::internal(e))?;
        file.flush().await.map_err(|e| CacheError::internal(e))?;

        Ok(written as i64)
    }
}

#[async_trait]
impl BlobBackend for DiskBackend {
    async fn write(
        &self,
        _repository: &str,
        reader: ByteStream,
        _start: i64,
        _end: i64,
        _declared_size: i64,
    ) -> CacheResult<WriteOutcome> {
        let part_handle = uuid::Uuid::new_v4().to_string();
        let path = self.base_dir.join(&part_handle);

        match self.write_stream_to(&path, reader).await {
            Ok(bytes_written) => Ok(WriteOutcome {
                part_handle,
                bytes_written,
            }),
            Err(err) => {
                let _ = tokio::fs::remove_file(&path).await;
                Err(err)
            }
        }
    }

    async fn delete(&self, _repository: &str, part_handle: &str) {
        let path = self.base_dir.join(part_handle);
        if let Err(err) = tokio::fs::remove_file(&path).await {
            warn!(part_handle, error = %err, "failed to delete part file");
        }
    }

    async fn finalise(&self, repository: &str, parts: &[CachePart]) -> CacheResult<String> {
        let artifact = uuid::Uuid::new_v4().to_string();
        let artifact_path = self.base_dir.join(&artifact);

        let result = self.finalise_inner(&artifact_path, parts).await;

        match result {
            Ok(()) => {
                for part in parts {
                    self.delete(repository, &part.part_handle).await;
                }
                Ok(artifact)
            }
            Err(err) => {
                let _ = tokio::fs::remove_file(&artifact_path).await;
                for part in parts {
                    self.delete(repository, &part.part_handle).await;
                }
                Err(err)
            }
        }
    }

    async fn generate_archive_url(
        &self,
        scheme: &str,
        host: &str,
        _repository: &str,
        artifact_path: &str,
    ) -> CacheResult<String> {
        Ok(format!("{scheme}://{host}/archive/{artifact_path}"))
    }

    async fn get_file_path(&self, key: &str) -> CacheResult<PathBuf> {
        let candidate = self.base_dir.join(key);
        let canonical = tokio::fs::canonicalize(&candidate)
            .await
            .map_err(|_| CacheError::NotFound)?;
        let canonical_base = tokio::fs::canonicalize(&self.base_dir)
            .await
            .map_err(|e| CacheError::internal(e))?;

        if !canonical.starts_with(&canonical_base) {
            return Err(CacheError::NotFound);
        }

        Ok(canonical)
    }

    fn backend_type(&self) -> &'static str {
        "disk"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures_util::stream;

    fn stream_of(data: &'static [u8]) -> ByteStream {
        Box::pin(stream::once(async move { Ok(Bytes::from_static(data)) }))
    }

    #[tokio::test]
    async fn writes_and_deletes_a_part() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DiskBackend::connect(dir.path()).await.unwrap();

        let outcome = backend
            .write("repo", stream_of(b"hello"), 0, 4, 5)
            .await
            .unwrap();
        assert_eq!(outcome.bytes_written, 5);

        backend.delete("repo", &outcome.part_handle).await;
        assert!(!dir.path().join(&outcome.part_handle).exists());
    }

    #[tokio::test]
    async fn finalises_parts_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DiskBackend::connect(dir.path()).await.unwrap();

        let first = backend.write("repo", stream_of(b"AAA"), 0, 2, 3).await.unwrap();
        let second = backend.write("repo", stream_of(b"BBB"), 3, 5, 3).await.unwrap();

        let parts = vec![
            CachePart {
                start: 0,
                end: 2,
                size: 3,
                part_handle: first.part_handle.clone(),
            },
            CachePart {
                start: 3,
                end: 5,
                size: 3,
                part_handle: second.part_handle.clone(),
            },
        ];

        let artifact = backend.finalise("repo", &parts).await.unwrap();
        let contents = tokio::fs::read(dir.path().join(&artifact)).await.unwrap();
        assert_eq!(contents, b"AAABBB");
        assert!(!dir.path().join(&first.part_handle).exists());
        assert!(!dir.path().join(&second.part_handle).exists());
    }

    #[tokio::test]
    async fn get_file_path_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DiskBackend::connect(dir.path()).await.unwrap();

        let result = backend.get_file_path("../../etc/passwd").await;
        assert!(matches!(result, Err(CacheError::NotFound)));
    }
}

impl DiskBackend {
    async fn finalise_inner(&self, artifact_path: &Path, parts: &[CachePart]) -> CacheResult<()> {
        let mut artifact_file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(artifact_path)
            .await
            .map_err(|e| CacheError::internal(e))?;

        for part in parts {
            let part_path = self.base_dir.join(&part.part_handle);
            let mut part_file = tokio::fs::File::open(&part_path)
                .await
                .map_err(|e| CacheError::internal(e))?;
            tokio::io::copy(&mut part_file, &mut artifact_file)
                .await
                .map_err(|e| CacheError::internal(e))?;
        }

        artifact_file.flush().await.map_err(|e| CacheError::internal(e))?;
        Ok(())
    }
}
