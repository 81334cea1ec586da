//! Request validators for key uploads.
//!
//! Callers must push real and decoy submissions through the same checks and
//! then equalize latency with [`UtcInstant::normalize_duration`]; decoys are
//! only discarded after that.

use crate::model::GaenKey;
use crate::time::{UtcInstant, DEFAULT_ROLLING_PERIOD};
use crate::validation::error::ValidationError;
use crate::validation::types::Authentication;
use log::{debug, warn};
use std::time::Duration;

/// Default number of days a key stays eligible for upload.
pub const DEFAULT_RETENTION_DAYS: u64 = 14;

/// Scope a claim must carry to submit keys.
pub const DEFAULT_SUBMISSION_SCOPE: &str = "exposed";

/// Capabilities every claim format implements.
pub trait RequestValidator: Send + Sync {
    /// Whether the authentication object may submit keys at all.
    fn is_valid(&self, auth: &Authentication) -> bool;

    /// The authoritative date of a submission.
    ///
    /// With a related key the key's own date wins after window checks;
    /// without one the claim's onset date is returned.
    fn get_key_date(
        &self,
        now: UtcInstant,
        auth: &Authentication,
        related_key: Option<&GaenKey>,
    ) -> Result<UtcInstant, ValidationError>;

    /// Whether the submission is a decoy. Decoy status set at either the
    /// claim or the key level is never downgraded.
    fn is_fake_request(
        &self,
        auth: &Authentication,
        related_key: Option<&GaenKey>,
    ) -> Result<bool, ValidationError>;
}

/// Policy values for key date checks.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub required_scope: String,
    pub rolling_period: Duration,
    pub retention: Duration,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            required_scope: DEFAULT_SUBMISSION_SCOPE.to_string(),
            rolling_period: DEFAULT_ROLLING_PERIOD,
            retention: Duration::from_secs(DEFAULT_RETENTION_DAYS * 24 * 3600),
        }
    }
}

/// Validator for JWT claim sets issued by the health authority.
pub struct ClaimValidator {
    config: ValidatorConfig,
}

impl ClaimValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }
}

impl Default for ClaimValidator {
    fn default() -> Self {
        Self::new(ValidatorConfig::default())
    }
}

impl RequestValidator for ClaimValidator {
    fn is_valid(&self, auth: &Authentication) -> bool {
        match auth.claims() {
            Some(claims) => claims.scope == self.config.required_scope,
            None => false,
        }
    }

    fn get_key_date(
        &self,
        now: UtcInstant,
        auth: &Authentication,
        related_key: Option<&GaenKey>,
    ) -> Result<UtcInstant, ValidationError> {
        let claims = auth
            .claims()
            .ok_or_else(|| ValidationError::IllegalInput("expected JWT claims".to_string()))?;
        let onset = claims.onset_date()?;

        let key = match related_key {
            Some(key) => key,
            None => return Ok(onset),
        };

        let key_date = UtcInstant::of(
            i64::from(key.rolling_start_number),
            self.config.rolling_period,
        )?;

        if key_date.is_after_exact(&now) {
            warn!("Rejecting key dated {} after now {}", key_date, now);
            return Err(ValidationError::InvalidDate(format!(
                "key date {} is in the future",
                key_date
            )));
        }
        if key_date.is_before_exact(&onset) {
            warn!("Rejecting key dated {} before onset {}", key_date, onset);
            return Err(ValidationError::InvalidDate(format!(
                "key date {} is before onset {}",
                key_date,
                onset.format_date()
            )));
        }
        let oldest = now.minus(self.config.retention);
        if key_date.is_before_exact(&oldest) {
            warn!("Rejecting key dated {} older than {}", key_date, oldest);
            return Err(ValidationError::InvalidDate(format!(
                "key date {} is outside the retention window",
                key_date
            )));
        }

        debug!("Key date {} accepted (onset {})", key_date, onset.format_date());
        Ok(key_date)
    }

    fn is_fake_request(
        &self,
        auth: &Authentication,
        related_key: Option<&GaenKey>,
    ) -> Result<bool, ValidationError> {
        let claims = auth
            .claims()
            .ok_or_else(|| ValidationError::IllegalInput("expected JWT claims".to_string()))?;
        let key = related_key
            .ok_or_else(|| ValidationError::IllegalInput("expected a GAEN key".to_string()))?;
        Ok(claims.is_fake() || key.is_fake())
    }
}

/// Development validator used when no claim verification key is configured.
///
/// Every caller is accepted and dates come straight from the keys.
pub struct PermissiveValidator {
    rolling_period: Duration,
}

impl PermissiveValidator {
    pub fn new(rolling_period: Duration) -> Self {
        Self { rolling_period }
    }
}

impl Default for PermissiveValidator {
    fn default() -> Self {
        Self::new(DEFAULT_ROLLING_PERIOD)
    }
}

impl RequestValidator for PermissiveValidator {
    fn is_valid(&self, _auth: &Authentication) -> bool {
        true
    }

    fn get_key_date(
        &self,
        now: UtcInstant,
        auth: &Authentication,
        related_key: Option<&GaenKey>,
    ) -> Result<UtcInstant, ValidationError> {
        match (related_key, auth.claims()) {
            (Some(key), _) => Ok(UtcInstant::of(
                i64::from(key.rolling_start_number),
                self.rolling_period,
            )?),
            (None, Some(claims)) => Ok(claims.onset_date()?),
            (None, None) => Ok(now.at_start_of_day()),
        }
    }

    fn is_fake_request(
        &self,
        auth: &Authentication,
        related_key: Option<&GaenKey>,
    ) -> Result<bool, ValidationError> {
        let key = related_key
            .ok_or_else(|| ValidationError::IllegalInput("expected a GAEN key".to_string()))?;
        let claim_fake = auth.claims().map(|c| c.is_fake()).unwrap_or(false);
        Ok(claim_fake || key.is_fake())
    }
}
