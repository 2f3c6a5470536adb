use chrono::{DateTime, Utc};
use forge_cache_core::model::Cache;

/// Row shape shared by the sqlite and postgres `SearchCache*` queries:
/// `cache_id, created_date, storage_backend, storage_path, scope, key, version`.
pub(crate) struct CacheRow {
    pub cache_id: i64,
    pub created_date: DateTime<Utc>,
    pub storage_backend: String,
    pub storage_path: String,
    pub scope: String,
    pub key: String,
    pub version: String,
}

impl CacheRow {
    pub(crate) fn into_cache(self, repository: &str) -> Cache {
        Cache {
            repository: repository.to_string(),
            scope: self.scope,
            key: self.key,
            version: self.version,
            cache_id: self.cache_id,
            created_at: self.created_date,
            storage_backend_type: self.storage_backend,
            storage_backend_path: self.storage_path,
            finished: true,
            size: 0,
        }
    }
}

/// Picks the first candidate (already ordered newest-first within its
/// scope) whose key starts with any `restore_keys` entry, trying each
/// restore key in order before moving to the next candidate batch.
pub(crate) fn pick_restore_key<'a>(
    candidates: &'a [CacheRow],
    restore_keys: &[String],
) -> Option<&'a CacheRow> {
    for restore_key in restore_keys {
        if let Some(hit) = candidates.iter().find(|c| c.key.starts_with(restore_key.as_str())) {
            return Some(hit);
        }
    }
    None
}
