//! Time functionality for CIF.
//!
//! Every timestamp the core hands to the catalog or embeds in a generation id
//! goes through a [`TimeProvider`], so that tests can pin "now" to a fixed
//! instant instead of relying on wall-clock time.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::explicit_iter_loop, clippy::use_self)]

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;

/// A UTC timestamp, truncated to microsecond resolution.
///
/// All timestamps that flow through the catalog (`created_on` columns,
/// `generation_id`) are derived from this type so that the truncation to
/// microseconds -- which is what makes `generation_id` derivable from
/// `created_on` -- happens in exactly one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Time(DateTime<Utc>);

impl Time {
    /// Wrap a [`DateTime<Utc>`], truncating to microsecond resolution.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        let micros = dt.timestamp_micros();
        Self(Self::datetime_from_micros(micros))
    }

    /// Construct a [`Time`] directly from a count of microseconds since the
    /// Unix epoch.
    pub fn from_timestamp_micros(micros: i64) -> Self {
        Self(Self::datetime_from_micros(micros))
    }

    fn datetime_from_micros(micros: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(
            micros.div_euclid(1_000_000),
            ((micros.rem_euclid(1_000_000)) * 1_000) as u32,
        )
        .expect("microsecond timestamp in range")
    }

    /// The number of whole microseconds since the Unix epoch. This is the
    /// value used as a source-local `generation_id`.
    pub fn timestamp_micros(&self) -> i64 {
        self.0.timestamp_micros()
    }

    /// The underlying [`DateTime<Utc>`].
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Time {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.to_rfc3339_opts(chrono::SecondsFormat::Micros, true).fmt(f)
    }
}

impl From<DateTime<Utc>> for Time {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::from_datetime(dt)
    }
}

/// A source of the current time, abstracted so it can be replaced with a
/// deterministic clock in tests.
pub trait TimeProvider: std::fmt::Debug + Send + Sync + 'static {
    /// Returns the current time.
    fn now(&self) -> Time;
}

/// A [`TimeProvider`] that returns the actual wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProvider {}

impl SystemProvider {
    /// Create a new [`SystemProvider`].
    pub fn new() -> Self {
        Self {}
    }
}

impl TimeProvider for SystemProvider {
    fn now(&self) -> Time {
        Time::from_datetime(Utc::now())
    }
}

/// A [`TimeProvider`] that returns a fixed, settable time. Used in tests to
/// pin `created_on`/`generation_id` to known values, and to simulate two
/// intake cycles landing in the same or different microseconds.
#[derive(Debug)]
pub struct MockProvider {
    now: Mutex<Time>,
}

impl MockProvider {
    /// Create a new [`MockProvider`] fixed at `start`.
    pub fn new(start: Time) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Set the time this provider will report.
    pub fn set(&self, time: Time) {
        *self.now.lock() = time;
    }

    /// Advance the time this provider will report by `duration`.
    pub fn inc(&self, duration: chrono::Duration) {
        let mut now = self.now.lock();
        *now = Time::from_datetime(now.as_datetime() + duration);
    }
}

impl TimeProvider for MockProvider {
    fn now(&self) -> Time {
        *self.now.lock()
    }
}

/// Convenience alias for the commonly shared form of a time provider.
pub type TimeProviderRef = Arc<dyn TimeProvider>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_to_microseconds() {
        let dt = "2025-06-19T12:34:56.123456789Z".parse::<DateTime<Utc>>().unwrap();
        let t = Time::from_datetime(dt);
        assert_eq!(t.timestamp_micros(), dt.timestamp_micros());
        // nanosecond remainder beyond microsecond precision is discarded
        assert_eq!(t.as_datetime().timestamp_subsec_nanos(), 123_456_000);
    }

    #[test]
    fn mock_provider_reports_fixed_time_until_advanced() {
        let start = Time::from_timestamp_micros(1_000_000);
        let mock = MockProvider::new(start);
        assert_eq!(mock.now(), start);
        mock.inc(chrono::Duration::seconds(1));
        assert_eq!(mock.now().timestamp_micros(), 2_000_000);
    }

    #[test]
    fn round_trips_through_micros() {
        let t = Time::from_timestamp_micros(1_750_000_000_123_456);
        assert_eq!(Time::from_timestamp_micros(t.timestamp_micros()), t);
    }
}
