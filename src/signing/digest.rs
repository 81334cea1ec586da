//! Content digest helpers shared by signer and verifier.

use crate::signing::error::IntegrityError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};

/// Hash algorithm label used in the digest header and token claims.
pub const HASH_ALGORITHM: &str = "sha-256";

/// SHA-256 over the exact body bytes.
pub fn content_digest(body: &[u8]) -> [u8; 32] {
    Sha256::digest(body).into()
}

/// `sha-256=<base64>` header value for a digest.
pub fn digest_header_value(digest: &[u8; 32]) -> String {
    format!("{}={}", HASH_ALGORITHM, STANDARD.encode(digest))
}

/// Parses a `sha-256=<base64>` header value.
pub fn parse_digest_header(value: &str) -> Result<[u8; 32], IntegrityError> {
    let (algorithm, encoded) = value
        .split_once('=')
        .ok_or_else(|| IntegrityError::MalformedDigest(value.to_string()))?;
    if !algorithm.trim().eq_ignore_ascii_case(HASH_ALGORITHM) {
        return Err(IntegrityError::MalformedDigest(format!(
            "unsupported algorithm {}",
            algorithm
        )));
    }
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| IntegrityError::MalformedDigest(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| IntegrityError::MalformedDigest("digest must be 32 bytes".to_string()))
}

/// Constant-time byte comparison.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
