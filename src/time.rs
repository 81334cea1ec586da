//! UTC instants with rolling-period arithmetic.
//!
//! Every timestamp handled by the backend is a [`UtcInstant`]: a millisecond
//! count since the Unix epoch, always interpreted in UTC. Diagnosis keys index
//! their validity in "rolling periods" (10 minutes unless configured
//! otherwise), so conversions to and from period counts are exact on period
//! boundaries.

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default rolling period length (10 minutes).
pub const DEFAULT_ROLLING_PERIOD: Duration = Duration::from_secs(10 * 60);

/// Number of rolling periods in one day at the default period length.
pub const ROLLING_PERIODS_PER_DAY: i32 = 144;

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Errors raised by time arithmetic and latency normalization.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeError {
    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Minimum duration of {min_ms}ms already expired ({elapsed_ms}ms elapsed)")]
    DurationExpired { min_ms: i64, elapsed_ms: i64 },
}

/// An immutable point in time, normalized to UTC, with millisecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UtcInstant {
    millis: i64,
}

impl UtcInstant {
    /// Current wall-clock time.
    pub fn now() -> Self {
        Self::from_millis(chrono::Utc::now().timestamp_millis())
    }

    pub fn from_millis(millis: i64) -> Self {
        Self { millis }
    }

    /// Builds the instant `count * unit` after the epoch.
    ///
    /// Fails with [`TimeError::InvalidDate`] when the unit is not a positive
    /// whole number of milliseconds or the result does not fit.
    pub fn of(count: i64, unit: Duration) -> Result<Self, TimeError> {
        let unit_ms = unit_millis(unit)
            .ok_or_else(|| TimeError::InvalidDate(format!("unsupported time unit {:?}", unit)))?;
        count
            .checked_mul(unit_ms)
            .map(Self::from_millis)
            .ok_or_else(|| TimeError::InvalidDate(format!("{} x {:?} overflows", count, unit)))
    }

    /// Parses a calendar date (`yyyy-MM-dd`) as midnight UTC.
    pub fn parse_date(date: &str) -> Result<Self, TimeError> {
        let parsed = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|e| TimeError::InvalidDate(format!("{}: {}", date, e)))?;
        let midnight = parsed
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| TimeError::InvalidDate(date.to_string()))?;
        Ok(Self::from_millis(midnight.and_utc().timestamp_millis()))
    }

    pub fn millis(&self) -> i64 {
        self.millis
    }

    /// Truncates to the UTC day boundary.
    pub fn at_start_of_day(&self) -> Self {
        Self::from_millis(self.millis - self.millis.rem_euclid(MILLIS_PER_DAY))
    }

    /// Truncates to a multiple of `unit` since the epoch.
    pub fn truncated_to(&self, unit: Duration) -> Self {
        let unit_ms = unit_millis(unit).unwrap_or(1);
        Self::from_millis(self.millis - self.millis.rem_euclid(unit_ms))
    }

    pub fn plus_days(&self, days: i64) -> Self {
        Self::from_millis(self.millis.saturating_add(days.saturating_mul(MILLIS_PER_DAY)))
    }

    pub fn minus_days(&self, days: i64) -> Self {
        Self::from_millis(self.millis.saturating_sub(days.saturating_mul(MILLIS_PER_DAY)))
    }

    pub fn plus(&self, duration: Duration) -> Self {
        Self::from_millis(self.millis.saturating_add(duration_millis(duration)))
    }

    pub fn minus(&self, duration: Duration) -> Self {
        Self::from_millis(self.millis.saturating_sub(duration_millis(duration)))
    }

    /// Whole `unit`s elapsed since the epoch (floor division).
    pub fn get_since_1970(&self, unit: Duration) -> i64 {
        self.millis.div_euclid(unit_millis(unit).unwrap_or(1))
    }

    /// Rolling start number at the default period length.
    pub fn get_ten_minutes_since_1970(&self) -> i64 {
        self.get_since_1970(DEFAULT_ROLLING_PERIOD)
    }

    pub fn get_days_since_1970(&self) -> i64 {
        self.millis.div_euclid(MILLIS_PER_DAY)
    }

    pub fn is_before_exact(&self, other: &UtcInstant) -> bool {
        self.millis < other.millis
    }

    pub fn is_after_exact(&self, other: &UtcInstant) -> bool {
        self.millis > other.millis
    }

    /// Day-granular comparison: true if this instant falls on an earlier UTC date.
    pub fn is_before_date_of(&self, other: &UtcInstant) -> bool {
        self.get_days_since_1970() < other.get_days_since_1970()
    }

    pub fn is_after_date_of(&self, other: &UtcInstant) -> bool {
        self.get_days_since_1970() > other.get_days_since_1970()
    }

    pub fn has_same_date(&self, other: &UtcInstant) -> bool {
        self.get_days_since_1970() == other.get_days_since_1970()
    }

    /// Formats the UTC calendar date as `yyyy-MM-dd`.
    pub fn format_date(&self) -> String {
        match DateTime::from_timestamp_millis(self.millis) {
            Some(dt) => dt.format("%Y-%m-%d").to_string(),
            None => self.millis.to_string(),
        }
    }

    /// Blocks the current thread until `min_duration` has passed since this
    /// instant.
    ///
    /// Returns [`TimeError::DurationExpired`] if the deadline is already
    /// behind us, so a second call on the same instant always fails.
    pub fn normalize_duration(&self, min_duration: Duration) -> Result<(), TimeError> {
        let remaining = self.remaining_until(min_duration)?;
        std::thread::sleep(remaining);
        Ok(())
    }

    /// Async variant of [`normalize_duration`](Self::normalize_duration);
    /// suspends only the calling task.
    pub async fn normalize_duration_async(&self, min_duration: Duration) -> Result<(), TimeError> {
        let remaining = self.remaining_until(min_duration)?;
        tokio::time::sleep(remaining).await;
        Ok(())
    }

    fn remaining_until(&self, min_duration: Duration) -> Result<Duration, TimeError> {
        let min_ms = duration_millis(min_duration);
        let deadline = self.millis.saturating_add(min_ms);
        let now = Self::now().millis;
        if now >= deadline {
            return Err(TimeError::DurationExpired {
                min_ms,
                elapsed_ms: now - self.millis,
            });
        }
        Ok(Duration::from_millis((deadline - now) as u64))
    }
}

impl fmt::Display for UtcInstant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match DateTime::from_timestamp_millis(self.millis) {
            Some(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.3fZ")),
            None => write!(f, "{}ms", self.millis),
        }
    }
}

fn unit_millis(unit: Duration) -> Option<i64> {
    i64::try_from(unit.as_millis()).ok().filter(|ms| *ms > 0)
}

fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_period_roundtrip_on_boundary() {
        let instant = UtcInstant::of(2_650_000, DEFAULT_ROLLING_PERIOD).unwrap();
        assert_eq!(instant.millis(), 2_650_000 * 600_000);
        assert_eq!(instant.get_ten_minutes_since_1970(), 2_650_000);
    }

    #[test]
    fn test_of_rejects_zero_unit() {
        let result = UtcInstant::of(10, Duration::ZERO);
        assert!(matches!(result, Err(TimeError::InvalidDate(_))));
    }

    #[test]
    fn test_of_rejects_overflow() {
        let result = UtcInstant::of(i64::MAX, Duration::from_secs(60));
        assert!(matches!(result, Err(TimeError::InvalidDate(_))));
    }

    #[test]
    fn test_at_start_of_day() {
        let instant = UtcInstant::parse_date("2021-03-04")
            .unwrap()
            .plus(Duration::from_secs(3_723));
        let midnight = instant.at_start_of_day();
        assert_eq!(midnight, UtcInstant::parse_date("2021-03-04").unwrap());
        assert_eq!(midnight.format_date(), "2021-03-04");
    }

    #[test]
    fn test_day_arithmetic() {
        let day = UtcInstant::parse_date("2021-03-01").unwrap();
        assert_eq!(day.minus_days(1).format_date(), "2021-02-28");
        assert_eq!(day.plus_days(14).format_date(), "2021-03-15");
        assert_eq!(day.plus_days(3).minus_days(3), day);
    }

    #[test]
    fn test_exact_and_date_comparisons() {
        let morning = UtcInstant::parse_date("2021-03-04").unwrap().plus(Duration::from_secs(60));
        let evening = morning.plus(Duration::from_secs(12 * 3600));
        assert!(morning.is_before_exact(&evening));
        assert!(evening.is_after_exact(&morning));
        assert!(!morning.is_before_exact(&morning));
        assert!(!morning.is_before_date_of(&evening));
        assert!(morning.has_same_date(&evening));
        assert!(morning.is_before_date_of(&evening.plus_days(1)));
        assert!(evening.plus_days(1).is_after_date_of(&morning));
    }

    #[test]
    fn test_parse_date_rejects_garbage() {
        assert!(matches!(
            UtcInstant::parse_date("04.03.2021"),
            Err(TimeError::InvalidDate(_))
        ));
    }

    #[test]
    fn test_truncation_before_epoch() {
        let instant = UtcInstant::from_millis(-1);
        assert_eq!(instant.at_start_of_day().millis(), -MILLIS_PER_DAY);
        assert_eq!(instant.get_ten_minutes_since_1970(), -1);
    }

    #[test]
    fn test_normalize_duration_waits_then_expires() {
        let start = UtcInstant::now();
        let min = Duration::from_millis(50);
        start.normalize_duration(min).unwrap();
        assert!(!UtcInstant::now().is_before_exact(&start.plus(min)));

        let second = start.normalize_duration(min);
        assert!(matches!(second, Err(TimeError::DurationExpired { .. })));
    }

    #[tokio::test]
    async fn test_normalize_duration_async_expired() {
        let past = UtcInstant::now().minus(Duration::from_secs(5));
        let result = past.normalize_duration_async(Duration::from_secs(1)).await;
        assert!(matches!(result, Err(TimeError::DurationExpired { min_ms: 1000, .. })));
    }
}
