//! Wall-clock stamping of chat events.
//!
//! Timestamps cross the wire as signed Unix milliseconds, so every stamp
//! is truncated to millisecond precision at creation. Equality of a
//! timestamp observed on both ends of a relay therefore holds exactly.
//! Deadlines and liveness use `std::time::Instant` directly.

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// Current wall-clock time, truncated to millisecond precision.
pub fn wall_now() -> DateTime<Utc> {
    let millis = Utc::now().timestamp_millis();
    // In range by construction; fall back to the untruncated value
    // rather than panic.
    DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
}

/// Encode a timestamp for the wire.
pub fn to_wire_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

/// Decode a wire timestamp; out-of-range values are malformed.
pub fn from_wire_millis(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| Error::MalformedFrame("timestamp out of range".into()))
}
