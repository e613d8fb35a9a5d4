/// Timestamp helpers shared by the reader, storage and rollup code
use time::macros::format_description;
use time::{Duration, OffsetDateTime, UtcOffset};

pub const SECONDS_PER_MINUTE: i64 = 60;
pub const SECONDS_PER_HOUR: i64 = 3_600;
pub const SECONDS_PER_DAY: i64 = 86_400;

/// Format a timestamp for human-readable logging
///
/// Converts an OffsetDateTime to DD.MM.YYYY - HH:MM:SS format
/// Falls back to default string representation if formatting fails.
pub fn format_datetime(dt: &OffsetDateTime) -> String {
    let format = format_description!("[day].[month].[year] - [hour]:[minute]:[second]");
    dt.format(format).unwrap_or_else(|_| dt.to_string())
}

/// Round a timestamp down to a multiple of `unit_secs` since the Unix epoch,
/// expressed in UTC
///
/// Minute, hour and day boundaries in UTC all line up with the epoch, so
/// this is the truncation used for every storage key.
pub fn truncate_utc(ts: OffsetDateTime, unit_secs: i64) -> OffsetDateTime {
    let ts = ts.to_offset(UtcOffset::UTC);
    let excess = ts.unix_timestamp().rem_euclid(unit_secs);
    ts - Duration::seconds(excess) - Duration::nanoseconds(i64::from(ts.nanosecond()))
}

/// Canonical storage key: `YYYY-MM-DDTHH:MM:SSZ` in UTC
///
/// Keys for the same hour share their first 14 characters and keys for the
/// same day share their first 11, which is what bucket prefix matching
/// relies on.
pub fn storage_key(ts: OffsetDateTime) -> Result<String, time::error::Format> {
    ts.to_offset(UtcOffset::UTC)
        .format(format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z"))
}

/// Storage key of the minute containing `ts`
pub fn minute_key(ts: OffsetDateTime) -> Result<String, time::error::Format> {
    storage_key(truncate_utc(ts, SECONDS_PER_MINUTE))
}
