/// Storage contract shared by the SQLite and PostgreSQL backends
use async_trait::async_trait;

use crate::database::rollup::Bucket;
use crate::error::StorageError;
use crate::models::{Aggregate, InsertOutcome, Record};

/// Table layout used by both backends; every table is keyed by a canonical
/// UTC timestamp string
pub const RAW_TABLE: &str = "records";

#[async_trait]
pub trait RecordStore: Send {
    /// Insert a record under its minute-truncated key unless that minute is
    /// already occupied
    async fn insert_raw_if_absent(&mut self, record: &Record)
        -> Result<InsertOutcome, StorageError>;

    /// Recompute and upsert the given buckets from the raw table, all in one
    /// transaction
    async fn recompute_buckets(&mut self, buckets: &[Bucket]) -> Result<(), StorageError>;

    /// Read back one bucket row
    async fn aggregate(&mut self, bucket: &Bucket) -> Result<Option<Aggregate>, StorageError>;
}
