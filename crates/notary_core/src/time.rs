//! Wall clock instants for NOTARY.
//!
//! A [`Timestamp`] is a UTC instant with nanosecond resolution. Consensus
//! arithmetic (medians, latency correction, distances) works on signed
//! nanoseconds since the Unix epoch so it never has to special-case
//! instants before 1970 or subtraction underflow.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const NANOS_PER_SEC: i128 = 1_000_000_000;

/// UTC instant
///
/// Sub-second nanoseconds are always `< 1_000_000_000`; deserialization
/// rejects anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "TimestampRepr")]
pub struct Timestamp {
    seconds: i64,
    nanos: u32,
}

#[derive(Deserialize)]
struct TimestampRepr {
    seconds: i64,
    nanos: u32,
}

impl TryFrom<TimestampRepr> for Timestamp {
    type Error = String;

    fn try_from(repr: TimestampRepr) -> Result<Self, Self::Error> {
        if repr.nanos >= Self::NANOS_PER_SEC {
            return Err(format!("sub-second nanos out of range: {}", repr.nanos));
        }
        Ok(Self {
            seconds: repr.seconds,
            nanos: repr.nanos,
        })
    }
}

impl Timestamp {
    /// Maximum nanoseconds per second
    pub const NANOS_PER_SEC: u32 = 1_000_000_000;

    /// Length of [`Timestamp::canonical_bytes`]
    pub const ENCODED_LEN: usize = 12;

    /// Create a new timestamp, carrying excess nanoseconds into seconds
    #[must_use]
    pub fn new(seconds: i64, nanos: u32) -> Self {
        let carry = i64::from(nanos / Self::NANOS_PER_SEC);
        Self {
            seconds: seconds.saturating_add(carry),
            nanos: nanos % Self::NANOS_PER_SEC,
        }
    }

    /// Seconds since the Unix epoch (may be negative)
    #[must_use]
    pub const fn seconds(&self) -> i64 {
        self.seconds
    }

    /// Sub-second nanoseconds
    #[must_use]
    pub const fn subsec_nanos(&self) -> u32 {
        self.nanos
    }

    /// Current local clock reading
    #[must_use]
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Convert from a chrono instant
    #[must_use]
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self::new(dt.timestamp(), dt.timestamp_subsec_nanos())
    }

    /// Convert to a chrono instant, `None` if outside chrono's range
    #[must_use]
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.seconds, self.nanos)
    }

    /// Build from signed nanoseconds since the epoch, saturating at the
    /// representable range
    #[must_use]
    pub fn from_unix_nanos(total: i128) -> Self {
        let seconds = total.div_euclid(NANOS_PER_SEC);
        let nanos = total.rem_euclid(NANOS_PER_SEC) as u32;
        match i64::try_from(seconds) {
            Ok(seconds) => Self { seconds, nanos },
            Err(_) if seconds < 0 => Self { seconds: i64::MIN, nanos: 0 },
            Err(_) => Self { seconds: i64::MAX, nanos: Self::NANOS_PER_SEC - 1 },
        }
    }

    /// Signed nanoseconds since the epoch
    #[must_use]
    pub fn as_unix_nanos(&self) -> i128 {
        i128::from(self.seconds) * NANOS_PER_SEC + i128::from(self.nanos)
    }

    /// Convert to milliseconds since the epoch
    #[must_use]
    pub fn as_millis(&self) -> i128 {
        self.as_unix_nanos() / 1_000_000
    }

    /// Shift by a signed number of nanoseconds
    #[must_use]
    pub fn offset_nanos(&self, delta: i128) -> Self {
        Self::from_unix_nanos(self.as_unix_nanos().saturating_add(delta))
    }

    /// Add a duration
    #[must_use]
    pub fn add(&self, duration: Duration) -> Self {
        self.offset_nanos(duration.as_nanos() as i128)
    }

    /// Subtract a duration
    #[must_use]
    pub fn sub(&self, duration: Duration) -> Self {
        self.offset_nanos(-(duration.as_nanos() as i128))
    }

    /// Signed distance `self - other` in nanoseconds
    #[must_use]
    pub fn nanos_since(&self, other: &Timestamp) -> i128 {
        self.as_unix_nanos() - other.as_unix_nanos()
    }

    /// Absolute distance between two instants
    #[must_use]
    pub fn abs_diff(&self, other: &Timestamp) -> Duration {
        let diff = self.nanos_since(other).unsigned_abs();
        let secs = u64::try_from(diff / NANOS_PER_SEC as u128).unwrap_or(u64::MAX);
        Duration::new(secs, (diff % NANOS_PER_SEC as u128) as u32)
    }

    /// Fixed-width big-endian encoding used inside signed payloads
    #[must_use]
    pub fn canonical_bytes(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[..8].copy_from_slice(&self.seconds.to_be_bytes());
        out[8..].copy_from_slice(&self.nanos.to_be_bytes());
        out
    }

    /// RFC 3339 rendering with nanosecond precision
    #[must_use]
    pub fn to_rfc3339(&self) -> String {
        match self.to_datetime() {
            Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Nanos, true),
            None => format!("{}.{:09}", self.seconds, self.nanos),
        }
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_rfc3339())
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::from_datetime(dt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_nano_carry() {
        let t = Timestamp::new(100, 1_200_000_000);
        assert_eq!(t.seconds, 101);
        assert_eq!(t.nanos, 200_000_000);
    }

    #[test]
    fn test_unix_nanos_roundtrip_negative() {
        let t = Timestamp::from_unix_nanos(-1);
        assert_eq!(t.seconds, -1);
        assert_eq!(t.nanos, 999_999_999);
        assert_eq!(t.as_unix_nanos(), -1);
    }

    #[test]
    fn test_timestamp_arithmetic() {
        let t1 = Timestamp::new(100, 500_000_000);
        let t2 = t1.add(Duration::from_millis(1700));
        assert_eq!(t2, Timestamp::new(102, 200_000_000));
        assert_eq!(t2.sub(Duration::from_millis(1700)), t1);
        assert_eq!(t2.abs_diff(&t1), Duration::from_millis(1700));
        assert_eq!(t1.abs_diff(&t2), Duration::from_millis(1700));
        assert_eq!(t1.nanos_since(&t2), -1_700_000_000);
    }

    #[test]
    fn test_canonical_bytes_fixed_width() {
        let t = Timestamp::new(1, 2);
        let bytes = t.canonical_bytes();
        assert_eq!(&bytes[..8], &1i64.to_be_bytes());
        assert_eq!(&bytes[8..], &2u32.to_be_bytes());
    }

    #[test]
    fn test_rfc3339() {
        let t = Timestamp::new(0, 0);
        assert_eq!(t.to_rfc3339(), "1970-01-01T00:00:00.000000000Z");
    }

    #[test]
    fn test_serde_rejects_out_of_range_nanos() {
        let t = Timestamp::new(1_700_000_000, 42);
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(serde_json::from_str::<Timestamp>(&json).unwrap(), t);

        let bad = r#"{"seconds": 1, "nanos": 1000000000}"#;
        assert!(serde_json::from_str::<Timestamp>(bad).is_err());
    }

    #[test]
    fn test_saturating_range() {
        let t = Timestamp::from_unix_nanos(i128::MAX);
        assert_eq!(t.seconds, i64::MAX);
    }
}
