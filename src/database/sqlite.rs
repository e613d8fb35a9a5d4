/// SQLite backend for local record storage
use async_trait::async_trait;
use log::info;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use crate::database::rollup::Bucket;
use crate::database::store::{RecordStore, RAW_TABLE};
use crate::error::StorageError;
use crate::models::{Aggregate, InsertOutcome, Record};
use crate::utils::minute_key;

/// Records plus their hourly and daily rollups in one SQLite file
///
/// # Schema
///
/// ```sql
/// CREATE TABLE records (
///     timestamp   TEXT PRIMARY KEY,
///     co2         INTEGER NOT NULL,
///     temperature REAL NOT NULL,
///     humidity    REAL NOT NULL
/// );
/// -- records_hourly_avg and records_daily_avg have the same columns,
/// -- with co2 stored as a REAL mean
/// ```
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let conn = Connection::open(path.as_ref())?;
        info!("Opened SQLite database {}", path.as_ref().display());
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        // lets the bucket LIKE prefix queries use the primary key index
        conn.execute_batch("PRAGMA case_sensitive_like = ON;")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                timestamp   TEXT PRIMARY KEY,
                co2         INTEGER NOT NULL,
                temperature REAL NOT NULL,
                humidity    REAL NOT NULL
            );
            CREATE TABLE IF NOT EXISTS records_hourly_avg (
                timestamp   TEXT PRIMARY KEY,
                co2         REAL NOT NULL,
                temperature REAL NOT NULL,
                humidity    REAL NOT NULL
            );
            CREATE TABLE IF NOT EXISTS records_daily_avg (
                timestamp   TEXT PRIMARY KEY,
                co2         REAL NOT NULL,
                temperature REAL NOT NULL,
                humidity    REAL NOT NULL
            );",
        )?;
        Ok(SqliteStore { conn })
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn insert_raw_if_absent(
        &mut self,
        record: &Record,
    ) -> Result<InsertOutcome, StorageError> {
        let key = minute_key(record.timestamp)?;
        let changed = self.conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {RAW_TABLE} (timestamp, co2, temperature, humidity)
                 VALUES (?1, ?2, ?3, ?4)"
            ),
            params![key, record.co2, record.temperature, record.humidity],
        )?;

        Ok(if changed > 0 {
            InsertOutcome::Inserted
        } else {
            InsertOutcome::AlreadyPresent
        })
    }

    async fn recompute_buckets(&mut self, buckets: &[Bucket]) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        for bucket in buckets {
            tx.execute(
                &format!(
                    "INSERT INTO {table} (timestamp, co2, temperature, humidity)
                     SELECT ?1, AVG(co2), AVG(temperature), AVG(humidity)
                     FROM {RAW_TABLE}
                     WHERE timestamp LIKE ?2
                     ON CONFLICT (timestamp) DO UPDATE SET co2         = excluded.co2,
                                                           temperature = excluded.temperature,
                                                           humidity    = excluded.humidity",
                    table = bucket.table()
                ),
                params![bucket.key(), bucket.like_pattern()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn aggregate(&mut self, bucket: &Bucket) -> Result<Option<Aggregate>, StorageError> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT timestamp, co2, temperature, humidity FROM {} WHERE timestamp = ?1",
                    bucket.table()
                ),
                params![bucket.key()],
                |row| {
                    Ok(Aggregate {
                        timestamp: row.get(0)?,
                        co2: row.get(1)?,
                        temperature: row.get(2)?,
                        humidity: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }
}
