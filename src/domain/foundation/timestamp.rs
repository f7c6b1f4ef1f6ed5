//! Timestamp value object for immutable points in time.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Immutable point in time, always UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a timestamp for the current moment.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a timestamp from a DateTime<Utc>.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the inner DateTime.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Checks if this timestamp is before another.
    pub fn is_before(&self, other: &Timestamp) -> bool {
        self.0 < other.0
    }

    /// Returns the duration from another timestamp to this one.
    ///
    /// Returns negative duration if other is after self.
    pub fn duration_since(&self, other: &Timestamp) -> Duration {
        self.0.signed_duration_since(other.0)
    }

    /// Creates a new timestamp offset by a std duration.
    ///
    /// Saturates at the maximum representable instant.
    pub fn plus(&self, delay: std::time::Duration) -> Self {
        let delta = Duration::from_std(delay).unwrap_or_else(|_| Duration::max_value());
        Self(self.0.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC))
    }

    /// Creates a new timestamp moved back by a std duration.
    ///
    /// Saturates at the minimum representable instant.
    pub fn minus(&self, delay: std::time::Duration) -> Self {
        let delta = Duration::from_std(delay).unwrap_or_else(|_| Duration::max_value());
        Self(self.0.checked_sub_signed(delta).unwrap_or(DateTime::<Utc>::MIN_UTC))
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;
    use std::thread::sleep;

    #[test]
    fn timestamp_now_creates_current_time() {
        let before = Utc::now();
        let ts = Timestamp::now();
        let after = Utc::now();

        assert!(ts.as_datetime() >= &before);
        assert!(ts.as_datetime() <= &after);
    }

    #[test]
    fn later_timestamp_is_not_before_earlier() {
        let ts1 = Timestamp::now();
        sleep(std::time::Duration::from_millis(10));
        let ts2 = Timestamp::now();

        assert!(ts1.is_before(&ts2));
        assert!(!ts2.is_before(&ts1));
    }

    #[test]
    fn plus_and_minus_offset_by_std_duration() {
        let base = Timestamp::now();
        let later = base.plus(std::time::Duration::from_millis(1500));
        let earlier = base.minus(std::time::Duration::from_secs(2));

        assert_eq!(later.duration_since(&base), Duration::milliseconds(1500));
        assert_eq!(base.duration_since(&earlier), Duration::seconds(2));
    }

    #[test]
    fn plus_saturates_instead_of_overflowing() {
        let ts = Timestamp::now().plus(std::time::Duration::from_secs(u64::MAX));
        assert_eq!(ts.as_datetime(), &DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn timestamp_deserializes_from_json() {
        let json = "\"2024-01-15T10:30:00Z\"";
        let ts: Timestamp = serde_json::from_str(json).unwrap();

        assert_eq!(ts.as_datetime().year(), 2024);
    }
}
