use async_trait::async_trait;
use chrono::Utc;
use forge_cache_core::backend::MetadataBackend;
use forge_cache_core::error::{CacheError, CacheResult};
use forge_cache_core::model::{Cache, CachePart, Scope};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::debug;

use crate::common::{pick_restore_key, CacheRow};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("migrations/sqlite");

/// Metadata backend on sqlite, for single-instance deployments.
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    pub async fn connect(connection_string: &str) -> CacheResult<Self> {
        // An in-memory database only has contents for the lifetime of one
        // connection, so a pool of several would each see an empty schema.
        let max_connections = if connection_string.contains(":memory:") {
            1
        } else {
            5
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(connection_string)
            .await
            .map_err(|e| CacheError::internal(e))?;

        MIGRATOR.run(&pool).await.map_err(|e| CacheError::internal(e))?;

        Ok(Self { pool })
    }

    async fn lookup_scope(
        &self,
        repository: &str,
        scope: &str,
    ) -> CacheResult<Vec<CacheRow>> {
        let rows = sqlx::query(
            r#"SELECT cache_id, created_date, storage_backend, storage_path, scope, key, version
               FROM cache
               WHERE repository = ?1 AND scope = ?2 AND finished = 1
               ORDER BY created_date DESC"#,
        )
        .bind(repository)
        .bind(scope)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CacheError::internal(e))?;

        rows.into_iter()
            .map(|row| {
                let created_date: String = row.try_get("created_date")?;
                Ok(CacheRow {
                    cache_id: row.try_get("cache_id")?,
                    created_date: chrono::DateTime::parse_from_rfc3339(&created_date)
                        .map(|dt| dt.with_timezone(&Utc))
                        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
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
impl MetadataBackend for SqliteBackend {
    async fn create_cache(
        &self,
        repository: &str,
        key: &str,
        version: &str,
        scopes: &[Scope],
        storage_backend_type: &str,
    ) -> CacheResult<i64> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await.map_err(|e| CacheError::internal(e))?;

        // The `cache_finished_identity` unique index is partial (`WHERE finished`);
        // this row is inserted with `finished = 0`, so it never collides with it at
        // insert time. The duplicate check has to happen explicitly, before the insert.
        let existing = sqlx::query(
            r#"SELECT 1 FROM cache
               WHERE repository = ?1 AND scope = ?2 AND key = ?3 AND version = ?4 AND finished = 1"#,
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

        let result = sqlx::query(
            r#"INSERT INTO cache ("repository","scope","key","version","cache_id","created_date","finished","size","storage_backend")
               VALUES (?1, ?2, ?3, ?4,
                   (SELECT COALESCE(MAX(cache_id), 0) + 1 FROM cache WHERE repository = ?1),
                   ?5, 0, 0, ?6)
               RETURNING cache_id"#,
        )
        .bind(repository)
        .bind(&scopes[0].scope)
        .bind(key)
        .bind(version)
        .bind(&now)
        .bind(storage_backend_type)
        .fetch_one(&mut *tx)
        .await;

        match result {
            Ok(row) => {
                let cache_id: i64 = row.try_get("cache_id").map_err(|e| CacheError::internal(e))?;
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
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
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
               FROM cache_part WHERE "repository" = ?1 AND "cache_id" = ?2 ORDER BY start_byte ASC"#,
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
            r#"UPDATE cache SET finished = 1, storage_path = ?1 WHERE repository = ?2 AND cache_id = ?3"#,
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
               WHERE repository = ?1 AND scope = ?2 AND key = ?3 AND version = ?4 AND finished = 1"#,
        )
        .bind(repository)
        .bind(&scopes[0].scope)
        .bind(primary_key)
        .bind(version)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CacheError::internal(e))?;

        if let Some(row) = exact {
            let created_date: String = row.try_get("created_date").map_err(|e| CacheError::internal(e))?;
            let cache_row = CacheRow {
                cache_id: row.try_get("cache_id").map_err(|e| CacheError::internal(e))?,
                created_date: chrono::DateTime::parse_from_rfc3339(&created_date)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| CacheError::internal(anyhow::anyhow!(e)))?,
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
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn backend() -> SqliteBackend {
        SqliteBackend::connect("sqlite::memory:").await.unwrap()
    }

    async fn add_complete_cache(
        backend: &SqliteBackend,
        repo: &str,
        key: &str,
        version: &str,
        scopes: &[Scope],
    ) -> i64 {
        let cache_id = backend
            .create_cache(repo, key, version, scopes, "somedb")
            .await
            .unwrap();
        backend
            .finish_cache(repo, cache_id, "somepath")
            .await
            .unwrap();
        cache_id
    }

    #[tokio::test]
    async fn reports_a_backend_type() {
        let backend = backend().await;
        assert_eq!(backend.backend_type(), "sqlite");
    }

    #[tokio::test]
    async fn finds_an_exact_match() {
        let backend = backend().await;
        let repo = Uuid::new_v4().to_string();
        let key = Uuid::new_v4().to_string();
        let version = Uuid::new_v4().to_string();
        let scopes = vec![Scope::new("refs/heads/master", 3)];

        add_complete_cache(&backend, &repo, &key, &version, &scopes).await;

        let cache = backend
            .search_cache(&repo, &key, &version, &scopes, &[])
            .await
            .unwrap();
        assert_eq!(cache.key, key);
        assert_eq!(cache.scope, scopes[0].scope);
    }

    #[tokio::test]
    async fn reports_no_cache_found_on_miss() {
        let backend = backend().await;
        let repo = Uuid::new_v4().to_string();
        let scopes = vec![Scope::new("refs/heads/master", 3)];
        add_complete_cache(
            &backend,
            &repo,
            &Uuid::new_v4().to_string(),
            &Uuid::new_v4().to_string(),
            &scopes,
        )
        .await;

        let result = backend
            .search_cache(
                &repo,
                &Uuid::new_v4().to_string(),
                &Uuid::new_v4().to_string(),
                &scopes,
                &[],
            )
            .await;
        assert!(matches!(result, Err(CacheError::NoCacheFound)));
    }

    #[tokio::test]
    async fn restores_by_prefix_on_the_same_scope() {
        let backend = backend().await;
        let repo = Uuid::new_v4().to_string();
        let key = format!("some-prefix-{}", Uuid::new_v4());
        let version = Uuid::new_v4().to_string();
        let scopes = vec![Scope::new("refs/heads/master", 3)];
        add_complete_cache(&backend, &repo, &key, &version, &scopes).await;

        let cache = backend
            .search_cache(
                &repo,
                &format!("some-prefix-{}", Uuid::new_v4()),
                &Uuid::new_v4().to_string(),
                &scopes,
                &["some-prefix-".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(cache.key, key);
        assert_eq!(cache.scope, scopes[0].scope);
    }

    #[tokio::test]
    async fn restores_by_prefix_across_scopes() {
        let backend = backend().await;
        let repo = Uuid::new_v4().to_string();
        let key = format!("some-prefix-{}", Uuid::new_v4());
        let version = Uuid::new_v4().to_string();
        let scopes = vec![Scope::new("refs/heads/master", 3)];
        add_complete_cache(&backend, &repo, &key, &version, &scopes).await;

        let caller_scopes = vec![
            Scope::new("refs/heads/test", 3),
            Scope::new("refs/heads/master", 1),
        ];

        let cache = backend
            .search_cache(
                &repo,
                &format!("some-prefix-{}", Uuid::new_v4()),
                &Uuid::new_v4().to_string(),
                &caller_scopes,
                &["some-prefix-".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(cache.key, key);
        assert_eq!(cache.scope, scopes[0].scope);
    }

    #[tokio::test]
    async fn rejects_duplicate_create() {
        let backend = backend().await;
        let repo = Uuid::new_v4().to_string();
        let key = Uuid::new_v4().to_string();
        let version = Uuid::new_v4().to_string();
        let scopes = vec![Scope::new("refs/heads/master", 3)];
        add_complete_cache(&backend, &repo, &key, &version, &scopes).await;

        let result = backend
            .create_cache(&repo, &key, &version, &scopes, "somedb")
            .await;
        assert!(matches!(result, Err(CacheError::CacheAlreadyExists)));
    }

    #[tokio::test]
    async fn validates_parts_uploaded_out_of_order() {
        let backend = backend().await;
        let repo = Uuid::new_v4().to_string();
        let scopes = vec![Scope::new("refs/heads/master", 3)];
        let cache_id = backend
            .create_cache(&repo, &Uuid::new_v4().to_string(), &Uuid::new_v4().to_string(), &scopes, "somedb")
            .await
            .unwrap();

        let second = CachePart {
            start: 101,
            end: 201,
            size: 101,
            part_handle: "somedata".into(),
        };
        let first = CachePart {
            start: 0,
            end: 100,
            size: 101,
            part_handle: "somedata".into(),
        };
        backend.add_upload_part(&repo, cache_id, second).await.unwrap();
        backend.add_upload_part(&repo, cache_id, first).await.unwrap();

        let parts = backend.validate_upload(&repo, cache_id, 202).await.unwrap();
        assert_eq!(parts[0].start, 0);
        assert_eq!(parts[1].start, 101);
    }

    #[tokio::test]
    async fn rejects_a_gap_between_parts() {
        let backend = backend().await;
        let repo = Uuid::new_v4().to_string();
        let scopes = vec![Scope::new("refs/heads/master", 3)];
        let cache_id = backend
            .create_cache(&repo, &Uuid::new_v4().to_string(), &Uuid::new_v4().to_string(), &scopes, "somedb")
            .await
            .unwrap();

        backend
            .add_upload_part(
                &repo,
                cache_id,
                CachePart {
                    start: 0,
                    end: 9,
                    size: 10,
                    part_handle: "somedata".into(),
                },
            )
            .await
            .unwrap();
        backend
            .add_upload_part(
                &repo,
                cache_id,
                CachePart {
                    start: 20,
                    end: 29,
                    size: 10,
                    part_handle: "somedata".into(),
                },
            )
            .await
            .unwrap();

        let result = backend.validate_upload(&repo, cache_id, 20).await;
        assert!(matches!(result, Err(CacheError::CacheInvalidParts)));
    }

    #[tokio::test]
    async fn rejects_a_size_mismatch() {
        let backend = backend().await;
        let repo = Uuid::new_v4().to_string();
        let scopes = vec![Scope::new("refs/heads/master", 3)];
        let cache_id = backend
            .create_cache(&repo, &Uuid::new_v4().to_string(), &Uuid::new_v4().to_string(), &scopes, "somedb")
            .await
            .unwrap();

        backend
            .add_upload_part(
                &repo,
                cache_id,
                CachePart {
                    start: 0,
                    end: 9,
                    size: 10,
                    part_handle: "somedata".into(),
                },
            )
            .await
            .unwrap();

        let result = backend.validate_upload(&repo, cache_id, 999).await;
        assert!(matches!(result, Err(CacheError::CacheSizeMismatch)));
    }
}
