use serde::Serialize;
use time::OffsetDateTime;

/// One sample decoded from a telemetry line
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub co2: u32,
    pub temperature: f64,
    pub humidity: f64,
}

/// A reading stamped with the wall-clock time its line was read
///
/// Field order is the publication order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub co2: u32,
    pub temperature: f64,
    pub humidity: f64,
}

impl Record {
    pub fn new(timestamp: OffsetDateTime, reading: Reading) -> Self {
        Record {
            timestamp,
            co2: reading.co2,
            temperature: reading.temperature,
            humidity: reading.humidity,
        }
    }
}

/// Result of a raw insert keyed by minute-truncated timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyPresent,
}

/// Stored mean values for one hourly or daily bucket
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub timestamp: String,
    pub co2: f64,
    pub temperature: f64,
    pub humidity: f64,
}
