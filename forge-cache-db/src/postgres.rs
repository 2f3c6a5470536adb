use async_trait::async_trait;
use chrono::{DateTime, Utc};
use forge_cache_core::backend::MetadataBackend;
use forge_cache_core::error::{CacheError, CacheResult};
use forge_cache_core::model::{Cache, CachePart, Scope};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::debug;

use crate::common::{pick_restore_key, CacheRow};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("migrations/postgres");

/// Metadata backend on postgres, for multi-instance deployments sharing a
/// single database (the single-writer-per-cache-entry assumption still
/// applies — see the orchestrator's concurrency notes).
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    pub async fn connect(connection_string: &str) -> CacheResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(connection_string)
            .await
            .map_err(|e| CacheError::internal(e))?;

        MIGRATOR.run(&pool).await.map_err(|e| CacheError::internal(e))?;

        Ok(Self { pool })
    }

    async fn lookup_scope(&self, repository: &str, scope: &str) -> CacheResult<Vec<CacheRow>> {
        let rows = sqlx::query(
            r#"SELECT cache_id, created_date, storage_backend, storage_path, scope, key, version
               FROM cache
               WHERE repository = $1 AND scope = $2 AND finished = TRUE
               ORDER BY created_date DESC"#,
        )
        .bind(repository)
        .bind(scope)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CacheError::internal(e))?;

        rows.into_iter()
            .map(|row| {
                Ok(CacheRow {
                    cache_id: row.try_get("cache_id")?,
                    created_date: row.try_get::<DateTime<Utc>, _>("created_date")?,
                    storage_backend: row.try_get("storage_backend")?,
                    storage_path: row.try_get("storage_path")?,
                    scope: row.try_get("scope")?,
                    key: row.try_get("key")?,
                    version: row.try_get("version")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| CacheError::internal(e))
    }
}

#[async_trait]
impl MetadataBackend for PostgresBackend {
    async fn create_cache(
        &self,
        repository: &str,
        key: &str,
        version: &str,
        scopes: &[Scope],
        storage_backend_type: &str,
    ) -> CacheResult<i64> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(|e| CacheError::internal(e))?;

        // The `cache_finished_identity` unique index is partial (`WHERE finished`);
        // this row is inserted with `finished = FALSE`, so it never collides with it
        // at insert time. The duplicate check has to happen explicitly, before the
        // insert — the `FOR UPDATE` below locks the candidate rows for the duration
        // of this transaction so a concurrent create can't slip in between the two.
        let existing = sqlx::query(
            r#"SELECT 1 FROM cache
               WHERE repository = $1 AND scope = $2 AND key = $3 AND version = $4 AND finished
               FOR UPDATE"#,
        )
        .bind(repository)
        .bind(&scopes[0].scope)
        .bind(key)
        .bind(version)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| CacheError::internal(e))?;

        if existing.is_some() {
            return Err(CacheError::CacheAlreadyExists);
        }

        let next_id_row = sqlx::query(
            "SELECT COALESCE(MAX(cache_id), 0) + 1 AS id FROM cache WHERE repository = $1 FOR UPDATE",
        )
        .bind(repository)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| CacheError::internal(e))?;
        let cache_id: i64 = next_id_row.try_get("id").map_err(|e| CacheError::internal(e))?;

        let result = sqlx::query(
            r#"INSERT INTO cache ("repository","scope","key","version","cache_id","created_date","finished","size","storage_backend")
               VALUES ($1, $2, $3, $4, $5, $6, FALSE, 0, $7)"#,
        )
        .bind(repository)
        .bind(&scopes[0].scope)
        .bind(key)
        .bind(version)
        .bind(cache_id)
        .bind(now)
        .bind(storage_backend_type)
        .execute(&mut *tx)
        .await;

        match result {
            Ok(_) => {
                tx.commit().await.map_err(|e| CacheError::internal(e))?;
                Ok(cache_id)
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(CacheError::CacheAlreadyExists)
            }
            Err(e) => Err(CacheError::internal(e)),
        }
    }

    async fn add_upload_part(
        &self,
        repository: &str,
        cache_id: i64,
        part: CachePart,
    ) -> CacheResult<()> {
        sqlx::query(
            r#"INSERT INTO cache_part ("repository", "cache_id", "start_byte", "end_byte", "size", "part_data")
               VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(repository)
        .bind(cache_id)
        .bind(part.start)
        .bind(part.end)
        .bind(part.size)
        .bind(&part.part_handle)
        .execute(&self.pool)
        .await
        .map_err(|e| CacheError::internal(e))?;

        Ok(())
    }

    async fn validate_upload(
        &self,
        repository: &str,
        cache_id: i64,
        declared_size: i64,
    ) -> CacheResult<Vec<CachePart>> {
        let rows = sqlx::query(
            r#"SELECT "start_byte", "end_byte", "size", "part_data"
               FROM cache_part WHERE "repository" = $1 AND "cache_id" = $2 ORDER BY start_byte ASC"#,
        )
        .bind(repository)
        .bind(cache_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CacheError::internal(e))?;

        let mut parts = Vec::with_capacity(rows.len());
        let mut next_start: i64 = 0;
        let mut total_size: i64 = 0;

        for row in rows {
            let part = CachePart {
                start: row.try_get("start_byte").map_err(|e| CacheError::internal(e))?,
                end: row.try_get("end_byte").map_err(|e| CacheError::internal(e))?,
                size: row.try_get("size").map_err(|e| CacheError::internal(e))?,
                part_handle: row.try_get("part_data").map_err(|e| CacheError::internal(e))?,
            };

            if part.start != next_start {
                debug!(repository, cache_id, "non-contiguous cache parts");
                return Err(CacheError::CacheInvalidParts);
            }
            next_start = part.end + 1;
            total_size += part.size;
            parts.push(part);
        }

        if total_size != declared_size {
            return Err(CacheError::CacheSizeMismatch);
        }

        Ok(parts)
    }

    async fn finish_cache(
        &self,
        repository: &str,
        cache_id: i64,
        artifact_path: &str,
    ) -> CacheResult<()> {
        sqlx::query(
            r#"UPDATE cache SET finished = TRUE, storage_path = $1 WHERE repository = $2 AND cache_id = $3"#,
        )
        .bind(artifact_path)
        .bind(repository)
        .bind(cache_id)
        .execute(&self.pool)
        .await
        .map_err(|e| CacheError::internal(e))?;

        Ok(())
    }

    async fn search_cache(
        &self,
        repository: &str,
        primary_key: &str,
        version: &str,
        scopes: &[Scope],
        restore_keys: &[String],
    ) -> CacheResult<Cache> {
        let exact = sqlx::query(
            r#"SELECT cache_id, created_date, storage_backend, storage_path, scope, key, version
               FROM cache
               WHERE repository = $1 AND scope = $2 AND key = $3 AND version = $4 AND finished = TRUE"#,
        )
        .bind(repository)
        .bind(&scopes[0].scope)
        .bind(primary_key)
        .bind(version)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CacheError::internal(e))?;

        if let Some(row) = exact {
            let cache_row = CacheRow {
                cache_id: row.try_get("cache_id").map_err(|e| CacheError::internal(e))?,
                created_date: row
                    .try_get::<DateTime<Utc>, _>("created_date")
                    .map_err(|e| CacheError::internal(e))?,
                storage_backend: row.try_get("storage_backend").map_err(|e| CacheError::internal(e))?,
                storage_path: row.try_get("storage_path").map_err(|e| CacheError::internal(e))?,
                scope: row.try_get("scope").map_err(|e| CacheError::internal(e))?,
                key: row.try_get("key").map_err(|e| CacheError::internal(e))?,
                version: row.try_get("version").map_err(|e| CacheError::internal(e))?,
            };
            return Ok(cache_row.into_cache(repository));
        }

        for scope in scopes {
            let candidates = self.lookup_scope(repository, &scope.scope).await?;
            if let Some(hit) = pick_restore_key(&candidates, restore_keys) {
                return Ok(CacheRow {
                    cache_id: hit.cache_id,
                    created_date: hit.created_date,
                    storage_backend: hit.storage_backend.clone(),
                    storage_path: hit.storage_path.clone(),
                    scope: hit.scope.clone(),
                    key: hit.key.clone(),
                    version: hit.version.clone(),
                }
                .into_cache(repository));
            }
        }

        Err(CacheError::NoCacheFound)
    }

    fn backend_type(&self) -> &'static str {
        "postgres"
    }
}
