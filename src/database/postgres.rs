/// PostgreSQL backend, used when a DATABASE_URL is configured
use async_trait::async_trait;
use log::info;
use tokio_postgres::Client;

use crate::database::connection::connect;
use crate::database::rollup::Bucket;
use crate::database::store::{RecordStore, RAW_TABLE};
use crate::error::StorageError;
use crate::models::{Aggregate, InsertOutcome, Record};
use crate::utils::minute_key;

/// Same three tables as the SQLite backend; timestamps stay TEXT so the
/// bucket prefix match works identically
pub struct PostgresStore {
    client: Client,
}

impl PostgresStore {
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let client = connect(database_url).await?;
        client
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS records (
                    timestamp   TEXT PRIMARY KEY,
                    co2         BIGINT NOT NULL,
                    temperature DOUBLE PRECISION NOT NULL,
                    humidity    DOUBLE PRECISION NOT NULL
                );
                CREATE TABLE IF NOT EXISTS records_hourly_avg (
                    timestamp   TEXT PRIMARY KEY,
                    co2         DOUBLE PRECISION NOT NULL,
                    temperature DOUBLE PRECISION NOT NULL,
                    humidity    DOUBLE PRECISION NOT NULL
                );
                CREATE TABLE IF NOT EXISTS records_daily_avg (
                    timestamp   TEXT PRIMARY KEY,
                    co2         DOUBLE PRECISION NOT NULL,
                    temperature DOUBLE PRECISION NOT NULL,
                    humidity    DOUBLE PRECISION NOT NULL
                );",
            )
            .await?;
        info!("Connected to PostgreSQL");
        Ok(PostgresStore { client })
    }
}

#[async_trait]
impl RecordStore for PostgresStore {
    async fn insert_raw_if_absent(
        &mut self,
        record: &Record,
    ) -> Result<InsertOutcome, StorageError> {
        let key = minute_key(record.timestamp)?;
        let changed = self
            .client
            .execute(
                &format!(
                    "INSERT INTO {RAW_TABLE} (timestamp, co2, temperature, humidity)
                     VALUES ($1, $2, $3, $4)
                     ON CONFLICT (timestamp) DO NOTHING"
                ),
                &[
                    &key,
                    &i64::from(record.co2),
                    &record.temperature,
                    &record.humidity,
                ],
            )
            .await?;

        Ok(if changed > 0 {
            InsertOutcome::Inserted
        } else {
            InsertOutcome::AlreadyPresent
        })
    }

    async fn recompute_buckets(&mut self, buckets: &[Bucket]) -> Result<(), StorageError> {
        let tx = self.client.transaction().await?;
        for bucket in buckets {
            let pattern = bucket.like_pattern();
            tx.execute(
                &format!(
                    "INSERT INTO {table} (timestamp, co2, temperature, humidity)
                     SELECT $1::TEXT, AVG(co2)::DOUBLE PRECISION, AVG(temperature), AVG(humidity)
                     FROM {RAW_TABLE}
                     WHERE timestamp LIKE $2
                     ON CONFLICT (timestamp) DO UPDATE SET co2         = excluded.co2,
                                                           temperature = excluded.temperature,
                                                           humidity    = excluded.humidity",
                    table = bucket.table()
                ),
                &[&bucket.key(), &pattern],
            )
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn aggregate(&mut self, bucket: &Bucket) -> Result<Option<Aggregate>, StorageError> {
        let row = self
            .client
            .query_opt(
                &format!(
                    "SELECT timestamp, co2, temperature, humidity FROM {} WHERE timestamp = $1",
                    bucket.table()
                ),
                &[&bucket.key()],
            )
            .await?;

        Ok(row.map(|row| Aggregate {
            timestamp: row.get(0),
            co2: row.get(1),
            temperature: row.get(2),
            humidity: row.get(3),
        }))
    }
}
