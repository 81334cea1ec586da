//! Diagnosis key records exchanged with clients and federation gateways.

use crate::time::{UtcInstant, ROLLING_PERIODS_PER_DAY};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

/// Decoded length of a temporary exposure key.
pub const GAEN_KEY_LENGTH: usize = 16;

/// A diagnosis key as submitted by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GaenKey {
    /// Base64-encoded key material.
    pub key_data: String,
    /// Rolling period index at which the key became valid.
    pub rolling_start_number: i32,
    /// Number of rolling periods the key stays valid.
    #[serde(default = "default_rolling_period")]
    pub rolling_period: i32,
    #[serde(default)]
    pub transmission_risk_level: i32,
    /// 1 marks a decoy submission.
    #[serde(default)]
    pub fake: i32,
}

fn default_rolling_period() -> i32 {
    ROLLING_PERIODS_PER_DAY
}

impl GaenKey {
    pub fn new(key_data: impl Into<String>, rolling_start_number: i32) -> Self {
        Self {
            key_data: key_data.into(),
            rolling_start_number,
            rolling_period: ROLLING_PERIODS_PER_DAY,
            transmission_risk_level: 0,
            fake: 0,
        }
    }

    pub fn is_fake(&self) -> bool {
        self.fake == 1
    }

    /// True if the key material decodes to exactly [`GAEN_KEY_LENGTH`] bytes.
    pub fn has_valid_key_data(&self) -> bool {
        STANDARD
            .decode(&self.key_data)
            .map(|bytes| bytes.len() == GAEN_KEY_LENGTH)
            .unwrap_or(false)
    }
}

/// A diagnosis key together with its federation metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GaenKeyForInterops {
    #[serde(flatten)]
    pub gaen_key: GaenKey,
    /// Country/region code of the issuing backend.
    pub origin: String,
    pub received_at: UtcInstant,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_since_onset_of_symptoms: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_type: Option<ReportType>,
}

impl GaenKeyForInterops {
    pub fn new(gaen_key: GaenKey, origin: impl Into<String>, received_at: UtcInstant) -> Self {
        Self {
            gaen_key,
            origin: origin.into(),
            received_at,
            batch_tag: None,
            days_since_onset_of_symptoms: None,
            report_type: None,
        }
    }

    pub fn with_batch_tag(mut self, batch_tag: impl Into<String>) -> Self {
        self.batch_tag = Some(batch_tag.into());
        self
    }
}

/// Diagnosis confirmation type carried by federated keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportType {
    ConfirmedTest,
    ConfirmedClinicalDiagnosis,
    SelfReport,
    Recursive,
    Revoked,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_data_length() {
        let valid = GaenKey::new(STANDARD.encode([7u8; 16]), 0);
        let short = GaenKey::new(STANDARD.encode([7u8; 15]), 0);
        let garbage = GaenKey::new("not base64!", 0);
        assert!(valid.has_valid_key_data());
        assert!(!short.has_valid_key_data());
        assert!(!garbage.has_valid_key_data());
    }

    #[test]
    fn test_deserialize_client_key_defaults() {
        let json = r#"{"keyData":"AAAAAAAAAAAAAAAAAAAAAA==","rollingStartNumber":2650000}"#;
        let key: GaenKey = serde_json::from_str(json).unwrap();
        assert_eq!(key.rolling_period, ROLLING_PERIODS_PER_DAY);
        assert_eq!(key.fake, 0);
        assert!(!key.is_fake());
    }

    #[test]
    fn test_interops_key_flattens_gaen_key() {
        let key = GaenKeyForInterops::new(
            GaenKey::new("AAAAAAAAAAAAAAAAAAAAAA==", 2650000),
            "CH",
            UtcInstant::from_millis(1_600_000_000_000),
        )
        .with_batch_tag("2021-03-04-1");
        let value = serde_json::to_value(&key).unwrap();
        assert_eq!(value["origin"], "CH");
        assert_eq!(value["rollingStartNumber"], 2650000);
        assert_eq!(value["receivedAt"], 1_600_000_000_000i64);
        assert_eq!(value["batchTag"], "2021-03-04-1");
        assert!(value.get("reportType").is_none());
    }
}
