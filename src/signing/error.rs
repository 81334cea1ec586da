//! Error types for key resolution and response signing.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Errors resolving key material from the vault.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyVaultError {
    #[error("No key vault entry for identifier {0}")]
    NoEntry(String),

    #[error("No provider for algorithm {0}")]
    NoProvider(String),

    #[error("Invalid key format: {0}")]
    InvalidFormat(String),

    #[error("Public key of entry {0} does not match its private key")]
    KeyMismatch(String),

    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),
}

/// Errors that abort signing of an outgoing response.
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("Response body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("Failed to buffer response body: {0}")]
    BodyRead(String),

    #[error("Buffering response body timed out after {0:?}")]
    Timeout(Duration),

    #[error("Key vault error: {0}")]
    KeyVault(#[from] KeyVaultError),

    #[error("Failed to create signature token: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("Invalid header value: {0}")]
    Header(String),
}

#[derive(Serialize)]
struct SigningErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for SigningError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(SigningErrorBody {
                error: "signing_failed",
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Reasons a client must treat a response as tampered.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("Missing {0} header")]
    MissingHeader(&'static str),

    #[error("Malformed digest header: {0}")]
    MalformedDigest(String),

    #[error("Body digest does not match")]
    DigestMismatch,

    #[error("Signature verification failed: {0}")]
    InvalidSignature(String),
}
