//! Key material types and the catalog of decoding providers.
//!
//! A provider turns stored key material of one algorithm family into usable
//! keys. Material may arrive PEM-armored, as base64 text or as raw DER; it is
//! unarmored before the provider sees it.

use crate::signing::error::KeyVaultError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use p256::pkcs8::LineEnding;
use p256::{PublicKey, SecretKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::collections::HashMap;
use std::fmt;

/// Which half of a key pair a provider produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialKind {
    Private,
    Public,
}

/// Decoded private key.
pub enum PrivateKeyMaterial {
    Ec(SecretKey),
    Rsa(Box<RsaPrivateKey>),
}

impl PrivateKeyMaterial {
    /// JWT signing key and the algorithm it signs with.
    pub fn encoding_key(&self) -> Result<(EncodingKey, Algorithm), KeyVaultError> {
        match self {
            PrivateKeyMaterial::Ec(secret) => {
                use p256::pkcs8::EncodePrivateKey;

                let pem = secret
                    .to_pkcs8_pem(LineEnding::LF)
                    .map_err(|e| KeyVaultError::Crypto(e.to_string()))?;
                let key = EncodingKey::from_ec_pem(pem.as_bytes())
                    .map_err(|e| KeyVaultError::Crypto(e.to_string()))?;
                Ok((key, Algorithm::ES256))
            }
            PrivateKeyMaterial::Rsa(private) => {
                use rsa::pkcs1::EncodeRsaPrivateKey;

                let pem = private
                    .to_pkcs1_pem(LineEnding::LF)
                    .map_err(|e| KeyVaultError::Crypto(e.to_string()))?;
                let key = EncodingKey::from_rsa_pem(pem.as_bytes())
                    .map_err(|e| KeyVaultError::Crypto(e.to_string()))?;
                Ok((key, Algorithm::RS256))
            }
        }
    }

    /// Public half derived from the private key.
    pub fn public_key(&self) -> PublicKeyMaterial {
        match self {
            PrivateKeyMaterial::Ec(secret) => PublicKeyMaterial::Ec(secret.public_key()),
            PrivateKeyMaterial::Rsa(private) => {
                PublicKeyMaterial::Rsa(RsaPublicKey::from(private.as_ref()))
            }
        }
    }
}

impl fmt::Debug for PrivateKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrivateKeyMaterial::Ec(_) => f.write_str("PrivateKeyMaterial::Ec([REDACTED])"),
            PrivateKeyMaterial::Rsa(_) => f.write_str("PrivateKeyMaterial::Rsa([REDACTED])"),
        }
    }
}

/// Decoded public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKeyMaterial {
    Ec(PublicKey),
    Rsa(RsaPublicKey),
}

impl PublicKeyMaterial {
    /// Decodes a P-256 or RSA public key in any accepted encoding.
    pub fn decode(material: &[u8]) -> Result<Self, KeyVaultError> {
        let der = unarmor(material)?;
        match decode_ec_public(&der).or_else(|_| decode_rsa_public(&der))? {
            KeyMaterial::Public(public) => Ok(public),
            KeyMaterial::Private(_) => Err(KeyVaultError::InvalidFormat(
                "expected a public key".to_string(),
            )),
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        match self {
            PublicKeyMaterial::Ec(_) => Algorithm::ES256,
            PublicKeyMaterial::Rsa(_) => Algorithm::RS256,
        }
    }

    /// SubjectPublicKeyInfo PEM, as published to clients.
    pub fn to_pem(&self) -> Result<String, KeyVaultError> {
        use p256::pkcs8::EncodePublicKey;

        match self {
            PublicKeyMaterial::Ec(public) => public.to_public_key_pem(LineEnding::LF),
            PublicKeyMaterial::Rsa(public) => public.to_public_key_pem(LineEnding::LF),
        }
        .map_err(|e| KeyVaultError::Crypto(e.to_string()))
    }

    /// JWT verification key.
    pub fn decoding_key(&self) -> Result<DecodingKey, KeyVaultError> {
        let pem = self.to_pem()?;
        match self {
            PublicKeyMaterial::Ec(_) => DecodingKey::from_ec_pem(pem.as_bytes()),
            PublicKeyMaterial::Rsa(_) => DecodingKey::from_rsa_pem(pem.as_bytes()),
        }
        .map_err(|e| KeyVaultError::Crypto(e.to_string()))
    }
}

/// Output of a provider.
#[derive(Debug)]
pub enum KeyMaterial {
    Private(PrivateKeyMaterial),
    Public(PublicKeyMaterial),
}

impl KeyMaterial {
    pub fn kind(&self) -> MaterialKind {
        match self {
            KeyMaterial::Private(_) => MaterialKind::Private,
            KeyMaterial::Public(_) => MaterialKind::Public,
        }
    }
}

/// Decoding function over unarmored DER bytes.
pub type DecodeFn = fn(&[u8]) -> Result<KeyMaterial, KeyVaultError>;

/// A named decoding function for one algorithm family and key half.
#[derive(Clone, Copy)]
pub struct EncodingProvider {
    name: &'static str,
    produces: MaterialKind,
    decode: DecodeFn,
}

impl EncodingProvider {
    pub const fn new(name: &'static str, produces: MaterialKind, decode: DecodeFn) -> Self {
        Self {
            name,
            produces,
            decode,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn produces(&self) -> MaterialKind {
        self.produces
    }

    /// Unarmors `material` and decodes it.
    pub fn decode(&self, material: &[u8]) -> Result<KeyMaterial, KeyVaultError> {
        let der = unarmor(material)?;
        (self.decode)(&der)
    }
}

impl fmt::Debug for EncodingProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodingProvider")
            .field("name", &self.name)
            .field("produces", &self.produces)
            .finish()
    }
}

pub const EC_PRIVATE: &str = "ec_private";
pub const EC_PUBLIC: &str = "ec_public";
pub const RSA_PRIVATE: &str = "rsa_private";
pub const RSA_PUBLIC: &str = "rsa_public";

/// Providers available for registration, looked up by name.
#[derive(Debug, Clone)]
pub struct ProviderCatalog {
    providers: HashMap<&'static str, EncodingProvider>,
}

impl ProviderCatalog {
    pub fn empty() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Catalog with the P-256 and RSA providers.
    pub fn builtin() -> Self {
        Self::empty()
            .with(EncodingProvider::new(EC_PRIVATE, MaterialKind::Private, decode_ec_private))
            .with(EncodingProvider::new(EC_PUBLIC, MaterialKind::Public, decode_ec_public))
            .with(EncodingProvider::new(RSA_PRIVATE, MaterialKind::Private, decode_rsa_private))
            .with(EncodingProvider::new(RSA_PUBLIC, MaterialKind::Public, decode_rsa_public))
    }

    pub fn with(mut self, provider: EncodingProvider) -> Self {
        self.providers.insert(provider.name, provider);
        self
    }

    pub fn lookup(&self, name: &str) -> Option<EncodingProvider> {
        self.providers.get(name).copied()
    }
}

impl Default for ProviderCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Strips PEM armor or base64 text down to DER; anything else is taken as
/// raw DER.
pub fn unarmor(material: &[u8]) -> Result<Vec<u8>, KeyVaultError> {
    let text = match std::str::from_utf8(material) {
        Ok(text) => text.trim(),
        Err(_) => return Ok(material.to_vec()),
    };

    if text.starts_with("-----BEGIN") {
        let parsed = pem::parse(text).map_err(|e| KeyVaultError::InvalidFormat(e.to_string()))?;
        return Ok(parsed.contents().to_vec());
    }

    let compact: String = text.split_whitespace().collect();
    match STANDARD.decode(&compact) {
        Ok(der) if !compact.is_empty() => Ok(der),
        _ => Ok(material.to_vec()),
    }
}

fn decode_ec_private(der: &[u8]) -> Result<KeyMaterial, KeyVaultError> {
    use p256::pkcs8::DecodePrivateKey;

    let secret = SecretKey::from_pkcs8_der(der)
        .or_else(|_| SecretKey::from_sec1_der(der))
        .map_err(|e| KeyVaultError::InvalidFormat(format!("EC private key: {}", e)))?;
    Ok(KeyMaterial::Private(PrivateKeyMaterial::Ec(secret)))
}

fn decode_ec_public(der: &[u8]) -> Result<KeyMaterial, KeyVaultError> {
    use p256::pkcs8::DecodePublicKey;

    let public = PublicKey::from_public_key_der(der)
        .or_else(|_| PublicKey::from_sec1_bytes(der))
        .map_err(|e| KeyVaultError::InvalidFormat(format!("EC public key: {}", e)))?;
    Ok(KeyMaterial::Public(PublicKeyMaterial::Ec(public)))
}

fn decode_rsa_private(der: &[u8]) -> Result<KeyMaterial, KeyVaultError> {
    use rsa::pkcs1::DecodeRsaPrivateKey;
    use rsa::pkcs8::DecodePrivateKey;

    let private = RsaPrivateKey::from_pkcs8_der(der)
        .or_else(|_| RsaPrivateKey::from_pkcs1_der(der))
        .map_err(|e| KeyVaultError::InvalidFormat(format!("RSA private key: {}", e)))?;
    Ok(KeyMaterial::Private(PrivateKeyMaterial::Rsa(Box::new(private))))
}

fn decode_rsa_public(der: &[u8]) -> Result<KeyMaterial, KeyVaultError> {
    use rsa::pkcs1::DecodeRsaPublicKey;
    use rsa::pkcs8::DecodePublicKey;

    let public = RsaPublicKey::from_public_key_der(der)
        .or_else(|_| RsaPublicKey::from_pkcs1_der(der))
        .map_err(|e| KeyVaultError::InvalidFormat(format!("RSA public key: {}", e)))?;
    Ok(KeyMaterial::Public(PublicKeyMaterial::Rsa(public)))
}
