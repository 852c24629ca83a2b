//! Shared SQL helpers
//!
//! Column encoders/decoders for the SQLite backend: timestamps are stored as
//! unix seconds, lists as JSON text, booleans as 0/1 integers.

use crate::Result;
use chrono::{DateTime, Utc};

/// Convert DateTime to SQLite INTEGER (unix timestamp)
#[inline]
pub fn datetime_to_unix(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

/// Parse DateTime from SQLite INTEGER (unix timestamp)
///
/// Out-of-range values decode to the epoch, which reads as long expired.
#[inline]
pub fn datetime_from_unix(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or(DateTime::UNIX_EPOCH)
}

/// Encode a string list as JSON TEXT
#[inline]
pub fn string_list_to_text(items: &[String]) -> Result<String> {
    Ok(serde_json::to_string(items)?)
}

/// Decode a string list from JSON TEXT
#[inline]
pub fn string_list_from_text(text: &str) -> Result<Vec<String>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(text)?)
}

#[inline]
pub fn bool_to_int(value: bool) -> i64 {
    i64::from(value)
}

#[inline]
pub fn bool_from_int(value: i64) -> bool {
    value != 0
}
