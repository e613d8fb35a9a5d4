/// Database operations for storing sensor records
use log::debug;

use crate::database::rollup;
use crate::database::store::RecordStore;
use crate::error::StorageError;
use crate::models::{InsertOutcome, Record};

/// Persist one record and keep its rollups consistent
///
/// The raw row is written first; the hourly and daily buckets are only
/// recomputed when the row was newly created. A duplicate minute leaves
/// every table untouched.
///
/// # Arguments
/// * `store` - Backend to write to
/// * `record` - Record to persist
///
/// # Returns
/// Whether the raw row was inserted or its minute was already present
pub async fn store_record(
    store: &mut (dyn RecordStore + '_),
    record: &Record,
) -> Result<InsertOutcome, StorageError> {
    let outcome = store.insert_raw_if_absent(record).await?;

    match outcome {
        InsertOutcome::Inserted => rollup::on_inserted(store, record).await?,
        InsertOutcome::AlreadyPresent => {
            debug!("Minute of {} already stored, skipping rollup", record.timestamp)
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::rollup::Bucket;
    use crate::database::sqlite::SqliteStore;
    use crate::models::Aggregate;
    use async_trait::async_trait;
    use time::macros::datetime;

    /// Counts rollup recomputes and read-backs on top of a real store
    struct CountingStore {
        inner: SqliteStore,
        recomputes: usize,
        reads: usize,
        fail_rollup: bool,
    }

    #[async_trait]
    impl RecordStore for CountingStore {
        async fn insert_raw_if_absent(
            &mut self,
            record: &Record,
        ) -> Result<InsertOutcome, StorageError> {
            self.inner.insert_raw_if_absent(record).await
        }

        async fn recompute_buckets(&mut self, buckets: &[Bucket]) -> Result<(), StorageError> {
            self.recomputes += 1;
            if self.fail_rollup {
                return Err(StorageError::Sqlite(rusqlite::Error::QueryReturnedNoRows));
            }
            self.inner.recompute_buckets(buckets).await
        }

        async fn aggregate(&mut self, bucket: &Bucket) -> Result<Option<Aggregate>, StorageError> {
            self.reads += 1;
            self.inner.aggregate(bucket).await
        }
    }

    fn counting_store(fail_rollup: bool) -> CountingStore {
        CountingStore {
            inner: SqliteStore::open_in_memory().unwrap(),
            recomputes: 0,
            reads: 0,
            fail_rollup,
        }
    }

    fn record(co2: u32) -> Record {
        Record {
            timestamp: datetime!(2023-06-16 14:05:30 UTC),
            co2,
            temperature: 21.5,
            humidity: 48.0,
        }
    }

    #[tokio::test]
    async fn new_minute_triggers_one_recompute() {
        let mut store = counting_store(false);

        let outcome = store_record(&mut store, &record(400)).await.unwrap();

        assert_eq!(outcome, InsertOutcome::Inserted);
        assert_eq!(store.recomputes, 1);
        // hourly and daily means are read back once each
        assert_eq!(store.reads, 2);
    }

    #[tokio::test]
    async fn duplicate_minute_triggers_no_recompute() {
        let mut store = counting_store(false);
        store_record(&mut store, &record(400)).await.unwrap();

        let outcome = store_record(&mut store, &record(800)).await.unwrap();

        assert_eq!(outcome, InsertOutcome::AlreadyPresent);
        assert_eq!(store.recomputes, 1);
        assert_eq!(store.reads, 2);
    }

    #[tokio::test]
    async fn rollup_failure_is_surfaced() {
        let mut store = counting_store(true);

        assert!(store_record(&mut store, &record(400)).await.is_err());
        assert_eq!(store.reads, 0);
    }
}
