use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of an upload/cache scope. `scope` is opaque — the system never
/// parses it, only tests equality and key-prefix on the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    #[serde(rename = "Scope")]
    pub scope: String,
    #[serde(rename = "Permission")]
    pub permission: i32,
}

impl Scope {
    pub fn new(scope: impl Into<String>, permission: i32) -> Self {
        Self {
            scope: scope.into(),
            permission,
        }
    }
}

/// A cache row, finished or in-progress.
#[derive(Debug, Clone, PartialEq)]
pub struct Cache {
    pub repository: String,
    pub scope: String,
    pub key: String,
    pub version: String,
    pub cache_id: i64,
    pub created_at: DateTime<Utc>,
    pub storage_backend_type: String,
    pub storage_backend_path: String,
    pub finished: bool,
    pub size: i64,
}

/// One uploaded byte range belonging to an in-progress cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePart {
    pub start: i64,
    pub end: i64,
    pub size: i64,
    pub part_handle: String,
}

impl CachePart {
    /// `size` must equal `end - start + 1`; the orchestrator enforces this
    /// before it ever reaches a backend.
    pub fn declared_size(start: i64, end: i64) -> i64 {
        end - start + 1
    }
}

/// Cache data shaped for the `SearchCache` HTTP response. Backend type/path
/// are never serialised to the client (§6 "JSON shapes").
#[derive(Debug, Clone, Serialize)]
pub struct CacheResponse {
    pub scope: String,
    #[serde(rename = "cacheKey")]
    pub cache_key: String,
    #[serde(rename = "cacheVersion")]
    pub cache_version: String,
    #[serde(rename = "creationTime")]
    pub creation_time: String,
    #[serde(rename = "archiveLocation")]
    pub archive_location: String,
}

impl Cache {
    pub fn into_response(self, archive_location: String) -> CacheResponse {
        CacheResponse {
            scope: self.scope,
            cache_key: self.key,
            cache_version: self.version,
            creation_time: self.created_at.to_rfc3339(),
            archive_location,
        }
    }
}
