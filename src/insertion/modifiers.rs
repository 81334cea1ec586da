//! Batch modifiers run before filtering.
//!
//! A modifier may add, drop or rewrite entries. It must never fail the whole
//! batch: malformed entries are defaulted or dropped.

use crate::model::GaenKeyForInterops;
use crate::time::UtcInstant;
use log::warn;

/// A rewriting step of the insertion pipeline.
pub trait KeyInsertionModifier: Send + Sync {
    fn name(&self) -> &'static str;

    fn modify(&self, now: UtcInstant, keys: Vec<GaenKeyForInterops>) -> Vec<GaenKeyForInterops>;
}

/// Assigns the local origin to entries that arrive without one and
/// upper-cases all origin codes.
///
/// Must run before any origin-based filter.
pub struct DefaultOriginModifier {
    origin: String,
}

impl DefaultOriginModifier {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into().to_ascii_uppercase(),
        }
    }
}

impl KeyInsertionModifier for DefaultOriginModifier {
    fn name(&self) -> &'static str {
        "default-origin"
    }

    fn modify(&self, _now: UtcInstant, keys: Vec<GaenKeyForInterops>) -> Vec<GaenKeyForInterops> {
        keys.into_iter()
            .map(|mut key| {
                let trimmed = key.origin.trim();
                key.origin = if trimmed.is_empty() {
                    self.origin.clone()
                } else {
                    trimmed.to_ascii_uppercase()
                };
                key
            })
            .collect()
    }
}

/// Fills in a default days-since-onset value for keys that carry none.
pub struct SymptomOnsetModifier {
    default_days_since_onset: i32,
}

impl SymptomOnsetModifier {
    pub fn new(default_days_since_onset: i32) -> Self {
        Self {
            default_days_since_onset,
        }
    }
}

impl KeyInsertionModifier for SymptomOnsetModifier {
    fn name(&self) -> &'static str {
        "symptom-onset"
    }

    fn modify(&self, _now: UtcInstant, keys: Vec<GaenKeyForInterops>) -> Vec<GaenKeyForInterops> {
        keys.into_iter()
            .map(|mut key| {
                key.days_since_onset_of_symptoms
                    .get_or_insert(self.default_days_since_onset);
                key
            })
            .collect()
    }
}

/// Drops entries whose key material is not 16 base64-encoded bytes.
#[derive(Default)]
pub struct KeyDataSanitizer;

impl KeyInsertionModifier for KeyDataSanitizer {
    fn name(&self) -> &'static str {
        "key-data-sanitizer"
    }

    fn modify(&self, _now: UtcInstant, keys: Vec<GaenKeyForInterops>) -> Vec<GaenKeyForInterops> {
        let before = keys.len();
        let kept: Vec<GaenKeyForInterops> = keys
            .into_iter()
            .filter(|key| key.gaen_key.has_valid_key_data())
            .collect();
        if kept.len() < before {
            warn!("Dropped {} keys with malformed key data", before - kept.len());
        }
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GaenKey;
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    fn key(origin: &str) -> GaenKeyForInterops {
        GaenKeyForInterops::new(
            GaenKey::new(STANDARD.encode([1u8; 16]), 2650000),
            origin,
            UtcInstant::from_millis(0),
        )
    }

    #[test]
    fn test_default_origin() {
        let modifier = DefaultOriginModifier::new("ch");
        let keys = modifier.modify(UtcInstant::now(), vec![key(""), key(" de "), key("  ")]);
        let origins: Vec<&str> = keys.iter().map(|k| k.origin.as_str()).collect();
        assert_eq!(origins, vec!["CH", "DE", "CH"]);
    }

    #[test]
    fn test_symptom_onset_keeps_existing() {
        let mut known = key("CH");
        known.days_since_onset_of_symptoms = Some(3);
        let keys = SymptomOnsetModifier::new(0).modify(UtcInstant::now(), vec![known, key("CH")]);
        assert_eq!(keys[0].days_since_onset_of_symptoms, Some(3));
        assert_eq!(keys[1].days_since_onset_of_symptoms, Some(0));
    }

    #[test]
    fn test_sanitizer_drops_malformed() {
        let mut broken = key("CH");
        broken.gaen_key.key_data = "c2hvcnQ=".to_string();
        let keys = KeyDataSanitizer.modify(UtcInstant::now(), vec![key("CH"), broken]);
        assert_eq!(keys.len(), 1);
    }
}
