//! Batch filters run after all modifiers.
//!
//! A filter only selects: it returns a subset of the entries it was given and
//! never rewrites one.

use crate::model::GaenKeyForInterops;
use crate::time::{UtcInstant, DEFAULT_ROLLING_PERIOD, ROLLING_PERIODS_PER_DAY};
use std::collections::HashSet;
use std::time::Duration;

/// A selecting step of the insertion pipeline.
pub trait KeyInsertionFilter: Send + Sync {
    fn name(&self) -> &'static str;

    fn filter(&self, now: UtcInstant, keys: Vec<GaenKeyForInterops>) -> Vec<GaenKeyForInterops>;
}

enum OriginPolicy {
    Reject(HashSet<String>),
    Allow(HashSet<String>),
}

/// Routes keys by origin code, either rejecting or allow-listing origins.
pub struct OriginFilter {
    policy: OriginPolicy,
}

impl OriginFilter {
    /// Drops keys whose origin is one of `origins`.
    pub fn rejecting<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            policy: OriginPolicy::Reject(normalize(origins)),
        }
    }

    /// Keeps only keys whose origin is one of `origins`.
    pub fn allowing<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            policy: OriginPolicy::Allow(normalize(origins)),
        }
    }
}

fn normalize<I, S>(origins: I) -> HashSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    origins
        .into_iter()
        .map(|o| o.as_ref().trim().to_ascii_uppercase())
        .collect()
}

impl KeyInsertionFilter for OriginFilter {
    fn name(&self) -> &'static str {
        "origin"
    }

    fn filter(&self, _now: UtcInstant, keys: Vec<GaenKeyForInterops>) -> Vec<GaenKeyForInterops> {
        keys.into_iter()
            .filter(|key| {
                let origin = key.origin.trim().to_ascii_uppercase();
                match &self.policy {
                    OriginPolicy::Reject(origins) => !origins.contains(&origin),
                    OriginPolicy::Allow(origins) => origins.contains(&origin),
                }
            })
            .collect()
    }
}

/// Drops decoy keys so they never reach storage.
#[derive(Default)]
pub struct FakeKeysFilter;

impl KeyInsertionFilter for FakeKeysFilter {
    fn name(&self) -> &'static str {
        "fake-keys"
    }

    fn filter(&self, _now: UtcInstant, keys: Vec<GaenKeyForInterops>) -> Vec<GaenKeyForInterops> {
        keys.into_iter().filter(|key| !key.gaen_key.is_fake()).collect()
    }
}

/// Keeps keys whose start date lies within `[now - retention, now]`.
pub struct RetentionFilter {
    rolling_period: Duration,
    retention: Duration,
}

impl RetentionFilter {
    pub fn new(rolling_period: Duration, retention: Duration) -> Self {
        Self {
            rolling_period,
            retention,
        }
    }
}

impl Default for RetentionFilter {
    fn default() -> Self {
        Self::new(DEFAULT_ROLLING_PERIOD, Duration::from_secs(14 * 24 * 3600))
    }
}

impl KeyInsertionFilter for RetentionFilter {
    fn name(&self) -> &'static str {
        "retention"
    }

    fn filter(&self, now: UtcInstant, keys: Vec<GaenKeyForInterops>) -> Vec<GaenKeyForInterops> {
        let oldest = now.minus(self.retention);
        keys.into_iter()
            .filter(|key| {
                match UtcInstant::of(
                    i64::from(key.gaen_key.rolling_start_number),
                    self.rolling_period,
                ) {
                    Ok(key_date) => {
                        !key_date.is_after_exact(&now) && !key_date.is_before_exact(&oldest)
                    }
                    Err(_) => false,
                }
            })
            .collect()
    }
}

/// Keeps keys whose rolling period is between 1 and one day.
#[derive(Default)]
pub struct ValidRollingPeriodFilter;

impl KeyInsertionFilter for ValidRollingPeriodFilter {
    fn name(&self) -> &'static str {
        "rolling-period"
    }

    fn filter(&self, _now: UtcInstant, keys: Vec<GaenKeyForInterops>) -> Vec<GaenKeyForInterops> {
        keys.into_iter()
            .filter(|key| (1..=ROLLING_PERIODS_PER_DAY).contains(&key.gaen_key.rolling_period))
            .collect()
    }
}
