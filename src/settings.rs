use crate::signing::wrapper::{SigningConfig, DEFAULT_MAX_BODY_BYTES};
use crate::validation::validator::{
    ValidatorConfig, DEFAULT_RETENTION_DAYS, DEFAULT_SUBMISSION_SCOPE,
};
use std::collections::HashMap;
use std::env;
use std::error::Error;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct ServerSettings {
    pub port: u16,
    pub key_vault_path: String,
    pub signing_key_id: String,
    /// Public key for bearer token verification. Without it uploads are
    /// accepted by the permissive validator.
    pub auth_public_key_path: Option<String>,
    pub retention_days: u64,
    pub rolling_period_minutes: u64,
    pub required_scope: String,
    pub local_origin: String,
    pub max_response_bytes: usize,
    pub signature_validity_seconds: u64,
    pub request_min_duration_ms: u64,
    /// Upper bound for buffering a response before signing it. Unset means
    /// no bound.
    pub response_buffer_timeout_ms: Option<u64>,
}

impl ServerSettings {
    pub fn from_env() -> Result<Self, Box<dyn Error>> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds settings from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Box<dyn Error>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let settings = ServerSettings {
            port: parse_or(&lookup, "PORT", 8080)?,
            key_vault_path: lookup("KEY_VAULT_PATH")
                .unwrap_or_else(|| "./key_vault.json".to_string()),
            signing_key_id: lookup("SIGNING_KEY_ID").unwrap_or_else(|| "signing".to_string()),
            auth_public_key_path: lookup("AUTH_PUBLIC_KEY_PATH").filter(|p| !p.is_empty()),
            retention_days: parse_or(&lookup, "RETENTION_DAYS", DEFAULT_RETENTION_DAYS)?,
            rolling_period_minutes: parse_or(&lookup, "ROLLING_PERIOD_MINUTES", 10)?,
            required_scope: lookup("REQUIRED_SCOPE")
                .unwrap_or_else(|| DEFAULT_SUBMISSION_SCOPE.to_string()),
            local_origin: lookup("LOCAL_ORIGIN")
                .unwrap_or_else(|| "CH".to_string())
                .to_uppercase(),
            max_response_bytes: parse_or(&lookup, "MAX_RESPONSE_BYTES", DEFAULT_MAX_BODY_BYTES)?,
            signature_validity_seconds: parse_or(&lookup, "SIGNATURE_VALIDITY_SECONDS", 86400)?,
            request_min_duration_ms: parse_or(&lookup, "REQUEST_MIN_DURATION_MS", 1500)?,
            response_buffer_timeout_ms: parse_opt(&lookup, "RESPONSE_BUFFER_TIMEOUT_MS")?,
        };

        if settings.rolling_period_minutes == 0 {
            return Err("ROLLING_PERIOD_MINUTES must be positive".into());
        }
        Ok(settings)
    }

    pub fn rolling_period(&self) -> Duration {
        Duration::from_secs(self.rolling_period_minutes * 60)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days * 24 * 3600)
    }

    pub fn request_min_duration(&self) -> Duration {
        Duration::from_millis(self.request_min_duration_ms)
    }

    pub fn validator_config(&self) -> ValidatorConfig {
        ValidatorConfig {
            required_scope: self.required_scope.clone(),
            rolling_period: self.rolling_period(),
            retention: self.retention(),
        }
    }

    pub fn signing_config(&self) -> SigningConfig {
        let mut config = SigningConfig::new(self.signing_key_id.clone());
        config.max_body_bytes = self.max_response_bytes;
        config.validity = Duration::from_secs(self.signature_validity_seconds);
        config.buffer_timeout = self.response_buffer_timeout_ms.map(Duration::from_millis);
        config
    }
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> Result<T, Box<dyn Error>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| -> Box<dyn Error> { format!("{}: {}", name, e).into() }),
        None => Ok(default),
    }
}

fn parse_opt<F, T>(lookup: &F, name: &str) -> Result<Option<T>, Box<dyn Error>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name).filter(|raw| !raw.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| -> Box<dyn Error> { format!("{}: {}", name, e).into() }),
        None => Ok(None),
    }
}

/// Variables as a map, for callers that already collected them.
pub fn lookup_from_map(vars: HashMap<String, String>) -> impl Fn(&str) -> Option<String> {
    move |name| vars.get(name).cloned()
}
