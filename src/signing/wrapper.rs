//! Response integrity: every outgoing body is digested and the digest signed.
//!
//! The middleware buffers the complete body, computes its SHA-256 digest,
//! signs a short-lived JWT embedding that digest and only then hands the
//! untouched body to the transport together with the `Digest` and
//! `Signature` headers. If any step fails the body is withheld.

use crate::signing::digest::{
    constant_time_eq, content_digest, digest_header_value, parse_digest_header, HASH_ALGORITHM,
};
use crate::signing::error::{IntegrityError, SigningError};
use crate::signing::key_vault::KeyVault;
use crate::signing::providers::PublicKeyMaterial;
use crate::time::UtcInstant;
use axum::{
    body::{Body, HttpBody},
    extract::{Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures_util::StreamExt;
use jsonwebtoken::{decode, encode, Algorithm, EncodingKey, Header, Validation};
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub const DIGEST_HEADER: &str = "digest";
pub const SIGNATURE_HEADER: &str = "signature";

/// Default upper bound for a buffered response body (16 MB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Settings of the response signer.
#[derive(Debug, Clone)]
pub struct SigningConfig {
    /// Vault identifier of the signing key pair.
    pub key_id: String,
    pub issuer: String,
    pub max_body_bytes: usize,
    /// Lifetime of a signature token.
    pub validity: Duration,
    /// Abandon buffering after this long.
    pub buffer_timeout: Option<Duration>,
}

impl SigningConfig {
    pub fn new(key_id: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            issuer: "gaen-trust".to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            validity: Duration::from_secs(24 * 3600),
            buffer_timeout: None,
        }
    }
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self::new("signing")
    }
}

/// Claims of the signature token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityClaims {
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(rename = "content-hash")]
    pub content_hash: String,
    #[serde(rename = "hash-alg")]
    pub hash_alg: String,
}

/// Header values produced for one body.
#[derive(Debug, Clone)]
pub struct SignedDigest {
    pub digest: String,
    pub signature: String,
}

/// Signs response digests with a key resolved once from the vault.
pub struct ResponseSigner {
    config: SigningConfig,
    encoding_key: EncodingKey,
    algorithm: Algorithm,
    public_key: PublicKeyMaterial,
}

impl ResponseSigner {
    pub fn new(vault: &KeyVault, config: SigningConfig) -> Result<Self, SigningError> {
        let pair = vault.get(&config.key_id)?;
        let (encoding_key, algorithm) = pair.private.encoding_key()?;
        Ok(Self {
            config,
            encoding_key,
            algorithm,
            public_key: pair.public,
        })
    }

    pub fn config(&self) -> &SigningConfig {
        &self.config
    }

    /// Public key clients verify signatures with.
    pub fn public_key(&self) -> &PublicKeyMaterial {
        &self.public_key
    }

    /// Digests `body` and signs the digest as of `now`.
    pub fn sign(&self, body: &[u8], now: UtcInstant) -> Result<SignedDigest, SigningError> {
        let digest = content_digest(body);
        let iat = now.millis().div_euclid(1000);
        let claims = IntegrityClaims {
            iss: self.config.issuer.clone(),
            iat,
            exp: iat.saturating_add(self.config.validity.as_secs() as i64),
            content_hash: STANDARD.encode(digest),
            hash_alg: HASH_ALGORITHM.to_string(),
        };

        let mut header = Header::new(self.algorithm);
        header.kid = Some(self.config.key_id.clone());
        let signature = encode(&header, &claims, &self.encoding_key)?;

        Ok(SignedDigest {
            digest: digest_header_value(&digest),
            signature,
        })
    }

    /// Buffers `body` within the configured size and time limits.
    pub async fn buffer(&self, body: Body) -> Result<Vec<u8>, SigningError> {
        let limit = self.config.max_body_bytes;
        if body.size_hint().lower() > limit as u64 {
            return Err(SigningError::BodyTooLarge { limit });
        }

        let collect = async {
            let mut stream = body.into_data_stream();
            let mut buffered = Vec::new();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| SigningError::BodyRead(e.to_string()))?;
                if buffered.len() + chunk.len() > limit {
                    return Err(SigningError::BodyTooLarge { limit });
                }
                buffered.extend_from_slice(&chunk);
            }
            Ok(buffered)
        };
        match self.config.buffer_timeout {
            Some(timeout) => tokio::time::timeout(timeout, collect)
                .await
                .map_err(|_| SigningError::Timeout(timeout))?,
            None => collect.await,
        }
    }

    async fn wrap(&self, response: Response) -> Result<Response, SigningError> {
        let (mut parts, body) = response.into_parts();
        let bytes = self.buffer(body).await?;
        let signed = self.sign(&bytes, UtcInstant::now())?;

        let digest = HeaderValue::from_str(&signed.digest)
            .map_err(|e| SigningError::Header(e.to_string()))?;
        let signature = HeaderValue::from_str(&signed.signature)
            .map_err(|e| SigningError::Header(e.to_string()))?;
        parts
            .headers
            .insert(HeaderName::from_static(DIGEST_HEADER), digest);
        parts
            .headers
            .insert(HeaderName::from_static(SIGNATURE_HEADER), signature);

        debug!("Signed response of {} bytes", bytes.len());
        Ok(Response::from_parts(parts, Body::from(bytes)))
    }
}

/// axum middleware signing every response passing through it.
///
/// ```ignore
/// let app = Router::new()
///     .route("/v1/gaen/exposed", post(handler))
///     .layer(middleware::from_fn_with_state(signer.clone(), sign_response));
/// ```
pub async fn sign_response(
    State(signer): State<Arc<ResponseSigner>>,
    request: Request,
    next: Next,
) -> Response {
    let response = next.run(request).await;
    match signer.wrap(response).await {
        Ok(signed) => signed,
        Err(e) => {
            error!("Withholding response, signing failed: {}", e);
            e.into_response()
        }
    }
}

/// Client-side check of a signed response.
///
/// Both headers must be present, the digest must match the received body and
/// the token must verify against `public_key` and embed that same digest.
pub fn verify_response(
    body: &[u8],
    digest_header: Option<&str>,
    signature_header: Option<&str>,
    public_key: &PublicKeyMaterial,
) -> Result<IntegrityClaims, IntegrityError> {
    let digest_header = digest_header.ok_or(IntegrityError::MissingHeader(DIGEST_HEADER))?;
    let signature_header =
        signature_header.ok_or(IntegrityError::MissingHeader(SIGNATURE_HEADER))?;

    let announced = parse_digest_header(digest_header)?;
    let actual = content_digest(body);
    if !constant_time_eq(&announced, &actual) {
        warn!("Response digest mismatch");
        return Err(IntegrityError::DigestMismatch);
    }

    let decoding_key = public_key
        .decoding_key()
        .map_err(|e| IntegrityError::InvalidSignature(e.to_string()))?;
    let mut validation = Validation::new(public_key.algorithm());
    validation.set_required_spec_claims(&["exp", "iat"]);
    let claims = decode::<IntegrityClaims>(signature_header, &decoding_key, &validation)
        .map_err(|e| IntegrityError::InvalidSignature(e.to_string()))?
        .claims;

    let signed = STANDARD
        .decode(&claims.content_hash)
        .map_err(|e| IntegrityError::InvalidSignature(e.to_string()))?;
    if !constant_time_eq(&signed, &actual) {
        warn!("Signed digest does not match response body");
        return Err(IntegrityError::DigestMismatch);
    }

    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::key_vault::KeyVaultEntry;

    const EC_PRIVATE_PEM: &str = include_str!("../../tests/fixtures/ec_signing_private.pem");
    const EC_PUBLIC_PEM: &str = include_str!("../../tests/fixtures/ec_signing_public.pem");
    const EC_OTHER_PRIVATE_PEM: &str = include_str!("../../tests/fixtures/ec_other_private.pem");
    const EC_OTHER_PUBLIC_PEM: &str = include_str!("../../tests/fixtures/ec_other_public.pem");
    const RSA_PRIVATE_PEM: &str = include_str!("../../tests/fixtures/rsa_signing_private.pem");
    const RSA_PUBLIC_PEM: &str = include_str!("../../tests/fixtures/rsa_signing_public.pem");

    fn vault() -> KeyVault {
        KeyVault::new(vec![
            KeyVaultEntry::new("signing", EC_PRIVATE_PEM, EC_PUBLIC_PEM, "EC"),
            KeyVaultEntry::new("other", EC_OTHER_PRIVATE_PEM, EC_OTHER_PUBLIC_PEM, "EC"),
            KeyVaultEntry::new("rsa", RSA_PRIVATE_PEM, RSA_PUBLIC_PEM, "RSA"),
        ])
    }

    fn signer(key_id: &str) -> ResponseSigner {
        ResponseSigner::new(&vault(), SigningConfig::new(key_id)).unwrap()
    }

    #[test]
    fn test_digest_header_matches_recomputed_digest() {
        let body = br#"{"gaenKeys":[]}"#;
        let signed = signer("signing").sign(body, UtcInstant::now()).unwrap();
        assert_eq!(signed.digest, digest_header_value(&content_digest(body)));
    }

    #[test]
    fn test_verify_with_signing_key() {
        let signer = signer("signing");
        let body = b"payload";
        let signed = signer.sign(body, UtcInstant::now()).unwrap();

        let claims = verify_response(
            body,
            Some(&signed.digest),
            Some(&signed.signature),
            signer.public_key(),
        )
        .unwrap();
        assert_eq!(claims.hash_alg, "sha-256");
        assert_eq!(claims.iss, "gaen-trust");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_verify_with_rsa_key() {
        let signer = signer("rsa");
        let body = b"payload";
        let signed = signer.sign(body, UtcInstant::now()).unwrap();
        assert!(verify_response(
            body,
            Some(&signed.digest),
            Some(&signed.signature),
            signer.public_key()
        )
        .is_ok());
    }

    #[test]
    fn test_verify_with_other_key_fails() {
        let body = b"payload";
        let signed = signer("signing").sign(body, UtcInstant::now()).unwrap();
        let other = vault().public_key("other").unwrap();

        let result = verify_response(body, Some(&signed.digest), Some(&signed.signature), &other);
        assert!(matches!(result, Err(IntegrityError::InvalidSignature(_))));
    }

    #[test]
    fn test_verify_detects_tampered_body() {
        let signer = signer("signing");
        let signed = signer.sign(b"payload", UtcInstant::now()).unwrap();
        let result = verify_response(
            b"pay1oad",
            Some(&signed.digest),
            Some(&signed.signature),
            signer.public_key(),
        );
        assert_eq!(result.unwrap_err(), IntegrityError::DigestMismatch);
    }

    #[test]
    fn test_verify_detects_swapped_digest_header() {
        let signer = signer("signing");
        let original = signer.sign(b"original", UtcInstant::now()).unwrap();
        let forged_body = b"forged";
        let forged_digest = digest_header_value(&content_digest(forged_body));

        let result = verify_response(
            forged_body,
            Some(&forged_digest),
            Some(&original.signature),
            signer.public_key(),
        );
        assert_eq!(result.unwrap_err(), IntegrityError::DigestMismatch);
    }

    #[test]
    fn test_verify_requires_both_headers() {
        let signer = signer("signing");
        let signed = signer.sign(b"x", UtcInstant::now()).unwrap();
        assert_eq!(
            verify_response(b"x", None, Some(&signed.signature), signer.public_key()).unwrap_err(),
            IntegrityError::MissingHeader(DIGEST_HEADER)
        );
        assert_eq!(
            verify_response(b"x", Some(&signed.digest), None, signer.public_key()).unwrap_err(),
            IntegrityError::MissingHeader(SIGNATURE_HEADER)
        );
    }

    #[test]
    fn test_signer_requires_vault_entry() {
        let result = ResponseSigner::new(&vault(), SigningConfig::new("missing"));
        assert!(matches!(result, Err(SigningError::KeyVault(_))));
    }

    #[tokio::test]
    async fn test_buffer_rejects_oversized_body() {
        let mut config = SigningConfig::new("signing");
        config.max_body_bytes = 4;
        let signer = ResponseSigner::new(&vault(), config).unwrap();

        let result = signer.buffer(Body::from(vec![0u8; 16])).await;
        assert!(matches!(result, Err(SigningError::BodyTooLarge { limit: 4 })));
    }

    #[tokio::test]
    async fn test_buffer_rejects_oversized_stream_without_size_hint() {
        let mut config = SigningConfig::new("signing");
        config.max_body_bytes = 8;
        let signer = ResponseSigner::new(&vault(), config).unwrap();

        let chunks = vec![Ok::<_, std::io::Error>(vec![1u8; 6]), Ok(vec![2u8; 6])];
        let body = Body::from_stream(futures_util::stream::iter(chunks));
        let result = signer.buffer(body).await;
        assert!(matches!(result, Err(SigningError::BodyTooLarge { limit: 8 })));
    }

    #[tokio::test]
    async fn test_buffer_collects_stream_within_limit() {
        let signer = signer("signing");
        let chunks = vec![Ok::<_, std::io::Error>(vec![1u8; 3]), Ok(vec![2u8; 2])];
        let body = Body::from_stream(futures_util::stream::iter(chunks));
        assert_eq!(signer.buffer(body).await.unwrap(), vec![1, 1, 1, 2, 2]);
    }

    #[tokio::test]
    async fn test_buffer_times_out_on_stalled_body() {
        let mut config = SigningConfig::new("signing");
        config.buffer_timeout = Some(Duration::from_millis(50));
        let signer = ResponseSigner::new(&vault(), config).unwrap();

        let stalled = futures_util::stream::pending::<Result<Vec<u8>, std::io::Error>>();
        let result = signer.buffer(Body::from_stream(stalled)).await;
        assert!(matches!(result, Err(SigningError::Timeout(_))));
    }
}
