/// Hourly and daily rollup maintenance
///
/// Each bucket row holds the mean of every raw record currently stored in
/// its time range. Buckets are recomputed from the raw table rather than
/// updated incrementally, so they stay exact under duplicate suppression,
/// out-of-order arrival and backfill.
///
/// Bucket membership is a `LIKE` prefix match on the raw table's timestamp
/// key. This only works because keys are UTC `YYYY-MM-DDTHH:MM:SSZ` strings:
/// all minutes of one hour share the first 14 characters
/// (`2023-06-16T14:`) and all minutes of one day share the first 11
/// (`2023-06-16T`).
///
/// Known limitation: only newly inserted raw rows trigger a recompute. Raw
/// rows deleted or edited out-of-band leave their buckets stale.
use log::{debug, warn};
use time::OffsetDateTime;

use crate::database::store::RecordStore;
use crate::error::StorageError;
use crate::models::Record;
use crate::utils::{storage_key, truncate_utc, SECONDS_PER_DAY, SECONDS_PER_HOUR};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Hourly,
    Daily,
}

impl Granularity {
    pub const ALL: [Granularity; 2] = [Granularity::Hourly, Granularity::Daily];

    /// Aggregate table holding buckets of this size
    pub fn table(self) -> &'static str {
        match self {
            Granularity::Hourly => "records_hourly_avg",
            Granularity::Daily => "records_daily_avg",
        }
    }

    fn seconds(self) -> i64 {
        match self {
            Granularity::Hourly => SECONDS_PER_HOUR,
            Granularity::Daily => SECONDS_PER_DAY,
        }
    }

    /// Length of the key prefix shared by every timestamp in one bucket
    fn prefix_len(self) -> usize {
        match self {
            Granularity::Hourly => "YYYY-MM-DDTHH:".len(),
            Granularity::Daily => "YYYY-MM-DDT".len(),
        }
    }
}

/// One aggregate row, addressed by its canonical start timestamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    pub granularity: Granularity,
    key: String,
}

impl Bucket {
    /// The bucket of the given size that contains `ts`
    pub fn containing(granularity: Granularity, ts: OffsetDateTime) -> Result<Self, StorageError> {
        let key = storage_key(truncate_utc(ts, granularity.seconds()))?;
        Ok(Bucket { granularity, key })
    }

    /// Primary key of the bucket row, e.g. `2023-06-16T14:00:00Z`
    pub fn key(&self) -> &str {
        &self.key
    }

    /// `LIKE` pattern selecting the raw rows in this bucket, e.g. `2023-06-16T14:%`
    pub fn like_pattern(&self) -> String {
        format!("{}%", &self.key[..self.granularity.prefix_len()])
    }

    pub fn table(&self) -> &'static str {
        self.granularity.table()
    }
}

/// Buckets touched by a record, one per granularity
pub fn buckets_for(record: &Record) -> Result<Vec<Bucket>, StorageError> {
    Granularity::ALL
        .iter()
        .map(|&granularity| Bucket::containing(granularity, record.timestamp))
        .collect()
}

/// Bring the hourly and daily buckets up to date after a raw insert
///
/// Must only be called for a record that was newly inserted. Both buckets
/// are rewritten in one transaction, then read back for the log. A failed
/// read-back does not fail the insert.
pub async fn on_inserted(
    store: &mut (dyn RecordStore + '_),
    record: &Record,
) -> Result<(), StorageError> {
    let buckets = buckets_for(record)?;
    store.recompute_buckets(&buckets).await?;

    for bucket in &buckets {
        match store.aggregate(bucket).await {
            Ok(Some(mean)) => debug!(
                "{} {}: co2 {:.1} ppm, {:.2} C, {:.2} %",
                bucket.table(),
                mean.timestamp,
                mean.co2,
                mean.temperature,
                mean.humidity
            ),
            Ok(None) => warn!("Bucket {} missing after recompute", bucket.key()),
            Err(e) => warn!("Could not read back bucket {}: {}", bucket.key(), e),
        }
    }
    Ok(())
}
