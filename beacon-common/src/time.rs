use std::fmt;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A unix timestamp with millisecond precision.
///
/// Browsers report time as fractional milliseconds since the epoch. Deserialization accepts both
/// integers and non-negative finite floats, which are truncated to whole milliseconds.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct UnixMillis(u64);

impl UnixMillis {
    /// Creates a timestamp from milliseconds since the unix epoch.
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Converts a system time into a timestamp.
    ///
    /// Times before the unix epoch are clamped to the epoch.
    pub fn from_system(time: SystemTime) -> Self {
        let millis = time
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();

        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Returns the current timestamp.
    #[inline]
    pub fn now() -> Self {
        Self::from_system(SystemTime::now())
    }

    /// Returns milliseconds since the unix epoch.
    pub fn as_millis(self) -> u64 {
        self.0
    }

    /// Adds a duration, saturating at the maximum timestamp.
    pub fn saturating_add(self, duration: Duration) -> Self {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(millis))
    }

    /// Subtracts a duration, saturating at the unix epoch.
    pub fn saturating_sub(self, duration: Duration) -> Self {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        Self(self.0.saturating_sub(millis))
    }

    /// Returns `true` if this timestamp lies within `[now - past, now + future]`.
    pub fn is_within(self, now: Self, past: Duration, future: Duration) -> bool {
        self >= now.saturating_sub(past) && self <= now.saturating_add(future)
    }

    /// Converts this timestamp into a UTC datetime.
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(i64::try_from(self.0).ok()?)
    }
}

impl fmt::Debug for UnixMillis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnixMillis({})", self.0)
    }
}

impl fmt::Display for UnixMillis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(datetime) => write!(f, "{}", datetime.to_rfc3339()),
            None => write!(f, "{}ms", self.0),
        }
    }
}

impl Serialize for UnixMillis {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(self.0)
    }
}

struct UnixMillisVisitor;

impl Visitor<'_> for UnixMillisVisitor {
    type Value = UnixMillis;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a non-negative number of milliseconds since the unix epoch")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(UnixMillis(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        u64::try_from(v)
            .map(UnixMillis)
            .map_err(|_| E::invalid_value(de::Unexpected::Signed(v), &self))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        if v.is_finite() && v >= 0.0 && v < u64::MAX as f64 {
            Ok(UnixMillis(v as u64))
        } else {
            Err(E::invalid_value(de::Unexpected::Float(v), &self))
        }
    }
}

impl<'de> Deserialize<'de> for UnixMillis {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(UnixMillisVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_integer_and_float() {
        let ts: UnixMillis = serde_json::from_str("1700000000123").unwrap();
        assert_eq!(ts.as_millis(), 1_700_000_000_123);

        let ts: UnixMillis = serde_json::from_str("1700000000123.875").unwrap();
        assert_eq!(ts.as_millis(), 1_700_000_000_123);
    }

    #[test]
    fn test_deserialize_rejects_negative_and_strings() {
        assert!(serde_json::from_str::<UnixMillis>("-5").is_err());
        assert!(serde_json::from_str::<UnixMillis>("-5.0").is_err());
        assert!(serde_json::from_str::<UnixMillis>("\"1700000000000\"").is_err());
    }

    #[test]
    fn test_is_within() {
        let now = UnixMillis::from_millis(10_000);
        let past = Duration::from_secs(5);
        let future = Duration::from_secs(1);

        assert!(UnixMillis::from_millis(5_000).is_within(now, past, future));
        assert!(UnixMillis::from_millis(11_000).is_within(now, past, future));
        assert!(!UnixMillis::from_millis(4_999).is_within(now, past, future));
        assert!(!UnixMillis::from_millis(11_001).is_within(now, past, future));
    }

    #[test]
    fn test_saturating_sub_clamps_to_epoch() {
        let ts = UnixMillis::from_millis(100).saturating_sub(Duration::from_secs(1));
        assert_eq!(ts, UnixMillis::from_millis(0));
    }

    #[test]
    fn test_display() {
        let ts = UnixMillis::from_millis(0);
        assert_eq!(ts.to_string(), "1970-01-01T00:00:00+00:00");
    }
}
