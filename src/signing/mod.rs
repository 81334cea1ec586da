//! Response integrity and signing key management.
//!
//! # Architecture
//!
//! ```text
//! handler ──▶ Response ──▶ sign_response (middleware)
//!                              │  buffer body (size / time bound)
//!                              │  sha-256 digest
//!                              │  JWT { content-hash, hash-alg, iss, iat, exp }
//!                              ▼
//!                          Digest + Signature headers, original body
//!
//! KeyVault ── id ──▶ KeyVaultEntry ── algorithm ──▶ EncodingProvider(s)
//! ```
//!
//! Clients verify with [`verify_response`] and the public half served by the
//! vault.

pub mod digest;
pub mod error;
pub mod key_vault;
pub mod providers;
pub mod wrapper;

pub use digest::{content_digest, digest_header_value, parse_digest_header, HASH_ALGORITHM};
pub use error::{IntegrityError, KeyVaultError, SigningError};
pub use key_vault::{KeyPair, KeyVault, KeyVaultEntry, ALGORITHM_EC, ALGORITHM_RSA};
pub use providers::{
    EncodingProvider, KeyMaterial, MaterialKind, PrivateKeyMaterial, ProviderCatalog,
    PublicKeyMaterial,
};
pub use wrapper::{
    sign_response, verify_response, IntegrityClaims, ResponseSigner, SignedDigest, SigningConfig,
    DIGEST_HEADER, SIGNATURE_HEADER,
};
