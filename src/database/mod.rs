pub mod connection;
pub mod operations;
pub mod postgres;
pub mod rollup;
pub mod sqlite;
pub mod store;

pub use operations::store_record;
pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;
pub use store::RecordStore;
