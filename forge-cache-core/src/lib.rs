pub mod backend;
pub mod content_range;
pub mod error;
pub mod model;
pub mod orchestrator;

pub use backend::{BlobBackend, ByteStream, MetadataBackend, WriteOutcome};
pub use content_range::{parse_content_range, ContentRange};
pub use error::{CacheError, CacheResult};
pub use model::{Cache, CachePart, CacheResponse, Scope};
pub use orchestrator::CacheOrchestrator;
