use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream as AwsByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use forge_cache_core::backend::{BlobBackend, ByteStream, WriteOutcome};
use forge_cache_core::error::{CacheError, CacheResult};
use forge_cache_core::model::CachePart;
use tracing::warn;

/// Archive URLs are valid for this long, matching the original backend's
/// fixed pre-signed-GET lifetime.
const PRESIGN_TTL: Duration = Duration::from_secs(5 * 60);

/// Object-store backend for any S3-compatible API.
///
/// Every arriving part is written as its own object under a random key —
/// regular multipart uploads require ascending, pre-declared part numbers,
/// which this protocol cannot promise since parts arrive concurrently and
/// out of order. `finalise` performs the real multipart upload: it opens
/// one, copies each ingested part object into it as a part **in `start`
/// order**, and completes it. A single-part cache skips the copy step
/// entirely and the lone part object becomes the artifact.
pub struct S3Backend {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3Backend {
    /// `connection_string` is `s3://bucket[/prefix]`. Mirrors the original
    /// backend's `Setup()`: connects with a default region, probes the
    /// bucket's actual region via `GetBucketLocation`, then rebuilds the
    /// client against that region if it differs.
    pub async fn connect(connection_string: &str) -> CacheResult<Self> {
        let url = url::Url::parse(connection_string)
            .map_err(|e| CacheError::invalid(format!("invalid S3 connection string: {e}")))?;
        if url.scheme() != "s3" {
            return Err(CacheError::invalid(
                "S3 url should be in the format of s3://bucket/prefix",
            ));
        }
        let bucket = url
            .host_str()
            .ok_or_else(|| CacheError::invalid("S3 url is missing a bucket name"))?
            .to_string();
        let prefix = url.path().trim_start_matches('/').to_string();

        let shared_config = aws_config::load_from_env().await;
        let client = Client::new(&shared_config);

        let location = client
            .get_bucket_location()
            .bucket(&bucket)
            .send()
            .await
            .map_err(|e| CacheError::internal(anyhow::anyhow!(e)))?;

        let client = match location.location_constraint() {
            Some(constraint) if !constraint.as_str().is_empty() => {
                let regional_config = aws_sdk_s3::config::Builder::from(&shared_config)
                    .region(aws_sdk_s3::config::Region::new(constraint.as_str().to_string()))
                    .build();
                Client::from_conf(regional_config)
            }
            _ => client,
        };

        Ok(Self {
            client,
            bucket,
            prefix,
        })
    }

    fn object_key(&self, repository: &str, name: &str) -> String {
        if self.prefix.is_empty() {
            format!("{repository}/{name}")
        } else {
            format!("{}/{repository}/{name}", self.prefix)
        }
    }
}

#[async_trait]
impl BlobBackend for S3Backend {
    async fn write(
        &self,
        repository: &str,
        mut reader: ByteStream,
        _start: i64,
        _end: i64,
        _declared_size: i64,
    ) -> CacheResult<WriteOutcome> {
        use futures_util::TryStreamExt;

        let part_name = uuid::Uuid::new_v4().to_string();
        let key = self.object_key(repository, &part_name);

        let mut buf = Vec::new();
        while let Some(chunk) = reader
            .try_next()
            .await
            .map_err(|e| CacheError::internal(anyhow::anyhow!(e)))?
        {
            buf.extend_from_slice(&chunk);
        }
        let bytes_written = buf.len() as i64;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(AwsByteStream::from(buf))
            .send()
            .await
            .map_err(|e| CacheError::internal(anyhow::anyhow!(e)))?;

        Ok(WriteOutcome {
            part_handle: part_name,
            bytes_written,
        })
    }

    async fn delete(&self, repository: &str, part_handle: &str) {
        let key = self.object_key(repository, part_handle);
        if let Err(err) = self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            warn!(part_handle, error = %err, "failed to delete part object");
        }
    }

    async fn finalise(&self, repository: &str, parts: &[CachePart]) -> CacheResult<String> {
        let artifact_name = uuid::Uuid::new_v4().to_string();
        let artifact_key = self.object_key(repository, &artifact_name);

        if parts.len() == 1 {
            let source_key = self.object_key(repository, &parts[0].part_handle);
            self.client
                .copy_object()
                .bucket(&self.bucket)
                .copy_source(format!("{}/{source_key}", self.bucket))
                .key(&artifact_key)
                .send()
                .await
                .map_err(|e| CacheError::internal(anyhow::anyhow!(e)))?;
            self.delete(repository, &parts[0].part_handle).await;
            return Ok(artifact_name);
        }

        let create = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&artifact_key)
            .send()
            .await
            .map_err(|e| CacheError::internal(anyhow::anyhow!(e)))?;
        let upload_id = create
            .upload_id()
            .ok_or_else(|| CacheError::internal(anyhow::anyhow!("no upload id returned")))?
            .to_string();

        match self
            .copy_parts(repository, &artifact_key, &upload_id, parts)
            .await
        {
            Ok(completed) => {
                self.client
                    .complete_multipart_upload()
                    .bucket(&self.bucket)
                    .key(&artifact_key)
                    .upload_id(&upload_id)
                    .multipart_upload(
                        CompletedMultipartUpload::builder()
                            .set_parts(Some(completed))
                            .build(),
                    )
                    .send()
                    .await
                    .map_err(|e| CacheError::internal(anyhow::anyhow!(e)))?;

                for part in parts {
                    self.delete(repository, &part.part_handle).await;
                }
                Ok(artifact_name)
            }
            Err(err) => {
                let _ = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(&artifact_key)
                    .upload_id(&upload_id)
                    .send()
                    .await;
                Err(err)
            }
        }
    }

    async fn generate_archive_url(
        &self,
        _scheme: &str,
        _host: &str,
        repository: &str,
        artifact_path: &str,
    ) -> CacheResult<String> {
        let key = self.object_key(repository, artifact_path);
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .presigned(
                PresigningConfig::expires_in(PRESIGN_TTL)
                    .map_err(|e| CacheError::internal(anyhow::anyhow!(e)))?,
            )
            .await
            .map_err(|e| CacheError::internal(anyhow::anyhow!(e)))?;

        Ok(presigned.uri().to_string())
    }

    async fn get_file_path(&self, _key: &str) -> CacheResult<PathBuf> {
        Err(CacheError::NotImplemented)
    }

    fn backend_type(&self) -> &'static str {
        "s3"
    }
}

impl S3Backend {
    /// Copies each part object into the open multipart upload in ascending
    /// `start` order, returning the completed-part descriptors needed to
    /// finish it.
    async fn copy_parts(
        &self,
        repository: &str,
        artifact_key: &str,
        upload_id: &str,
        parts: &[CachePart],
    ) -> CacheResult<Vec<CompletedPart>> {
        let mut ordered = parts.to_vec();
        ordered.sort_by_key(|p| p.start);

        let mut completed = Vec::with_capacity(ordered.len());
        for (index, part) in ordered.iter().enumerate() {
            let part_number = (index + 1) as i32;
            let source_key = self.object_key(repository, &part.part_handle);

            let response = self
                .client
                .upload_part_copy()
                .bucket(&self.bucket)
                .key(artifact_key)
                .upload_id(upload_id)
                .part_number(part_number)
                .copy_source(format!("{}/{source_key}", self.bucket))
                .send()
                .await
                .map_err(|e| CacheError::internal(anyhow::anyhow!(e)))?;

            let etag = response
                .copy_part_result()
                .and_then(|r| r.e_tag())
                .ok_or_else(|| CacheError::internal(anyhow::anyhow!("missing etag on part copy")))?
                .to_string();

            completed.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(etag)
                    .build(),
            );
        }

        Ok(completed)
    }
}
