pub mod disk;
pub mod s3;

pub use disk::DiskBackend;
pub use s3::S3Backend;
