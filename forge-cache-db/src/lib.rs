mod common;
pub mod postgres;
pub mod sqlite;

pub use postgres::PostgresBackend;
pub use sqlite::SqliteBackend;
