//! Authentication objects handed to request validators.

use crate::time::{TimeError, UtcInstant};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// Claims carried by an upload bearer token.
///
/// Tokens are issued by the health authority backend; this crate only reads
/// them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthClaims {
    /// Scope marker; key submission requires the configured scope.
    pub scope: String,
    /// Symptom onset date, `yyyy-MM-dd`.
    pub onset: String,
    /// `"1"` marks a decoy upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fake: Option<String>,
}

impl AuthClaims {
    pub fn is_fake(&self) -> bool {
        self.fake.as_deref() == Some("1")
    }

    pub fn onset_date(&self) -> Result<UtcInstant, TimeError> {
        UtcInstant::parse_date(&self.onset)
    }

    /// Verifies a bearer token's signature and expiry and extracts its claims.
    pub fn from_bearer_token(
        token: &str,
        decoding_key: &DecodingKey,
        algorithm: Algorithm,
    ) -> Result<Self, jsonwebtoken::errors::Error> {
        let mut validation = Validation::new(algorithm);
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp"]);
        Ok(decode::<AuthClaims>(token, decoding_key, &validation)?.claims)
    }
}

/// Whatever the transport layer authenticated the caller as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authentication {
    /// A verified claim set.
    Claims(AuthClaims),
    /// No credential was presented.
    Anonymous,
}

impl Authentication {
    pub fn claims(&self) -> Option<&AuthClaims> {
        match self {
            Authentication::Claims(claims) => Some(claims),
            Authentication::Anonymous => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const AUTH_PRIVATE_PEM: &str = include_str!("../../tests/fixtures/ec_auth_private.pem");
    const AUTH_PUBLIC_PEM: &str = include_str!("../../tests/fixtures/ec_auth_public.pem");

    #[test]
    fn test_fake_flag() {
        let mut claims = AuthClaims {
            scope: "exposed".to_string(),
            onset: "2021-03-01".to_string(),
            fake: None,
        };
        assert!(!claims.is_fake());
        claims.fake = Some("0".to_string());
        assert!(!claims.is_fake());
        claims.fake = Some("1".to_string());
        assert!(claims.is_fake());
    }

    #[test]
    fn test_from_bearer_token() {
        let exp = chrono::Utc::now().timestamp() + 300;
        let token = encode(
            &Header::new(Algorithm::ES256),
            &serde_json::json!({
                "scope": "exposed",
                "onset": "2021-03-01",
                "fake": "0",
                "exp": exp,
            }),
            &EncodingKey::from_ec_pem(AUTH_PRIVATE_PEM.as_bytes()).unwrap(),
        )
        .unwrap();

        let key = DecodingKey::from_ec_pem(AUTH_PUBLIC_PEM.as_bytes()).unwrap();
        let claims = AuthClaims::from_bearer_token(&token, &key, Algorithm::ES256).unwrap();
        assert_eq!(claims.scope, "exposed");
        assert_eq!(claims.onset_date().unwrap().format_date(), "2021-03-01");
    }

    #[test]
    fn test_from_bearer_token_rejects_expired() {
        let token = encode(
            &Header::new(Algorithm::ES256),
            &serde_json::json!({ "scope": "exposed", "onset": "2021-03-01", "exp": 1_000 }),
            &EncodingKey::from_ec_pem(AUTH_PRIVATE_PEM.as_bytes()).unwrap(),
        )
        .unwrap();

        let key = DecodingKey::from_ec_pem(AUTH_PUBLIC_PEM.as_bytes()).unwrap();
        assert!(AuthClaims::from_bearer_token(&token, &key, Algorithm::ES256).is_err());
    }
}
