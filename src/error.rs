/// Error types shared across the device, storage and publication paths
use thiserror::Error;

/// Failure reading from or writing to the line transport
///
/// `Timeout` is an expected event while the device is quiet; `Closed` and
/// `Io` end the session.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("read timed out")]
    Timeout,

    #[error("transport closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure driving the device handshake or the streaming session
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("command `{command}` rejected by device: {reason}")]
    Rejected { command: String, reason: String },

    #[error("timed out waiting for response to `{command}`")]
    TimedOut { command: String },

    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("invalid session state: {0:?}")]
    InvalidState(crate::device::session::SessionState),
}

/// Failure converting a telemetry line into a reading
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("line does not match telemetry pattern")]
    NoMatch,

    #[error("invalid number in field `{0}`")]
    InvalidNumber(&'static str),
}

/// Failure persisting a record or maintaining its rollups
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("TLS setup error: {0}")]
    Tls(String),

    #[error("invalid database URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("timestamp formatting error: {0}")]
    Timestamp(#[from] time::error::Format),
}

/// Failure handing a record to a publication sink
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("metrics API rejected submission ({status}): {body}")]
    Rejected { status: u16, body: String },
}
