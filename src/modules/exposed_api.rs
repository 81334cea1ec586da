use crate::insertion::InsertionPipeline;
use crate::model::{GaenKey, GaenKeyForInterops};
use crate::signing::{sign_response, PublicKeyMaterial, ResponseSigner};
use crate::time::UtcInstant;
use crate::validation::{AuthClaims, Authentication, RequestValidator, ValidationError};
use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use jsonwebtoken::{Algorithm, DecodingKey};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Verifies upload bearer tokens.
pub struct BearerVerifier {
    key: DecodingKey,
    algorithm: Algorithm,
}

impl BearerVerifier {
    pub fn new(key: DecodingKey, algorithm: Algorithm) -> Self {
        Self { key, algorithm }
    }

    pub fn from_public_key(
        public_key: &PublicKeyMaterial,
    ) -> Result<Self, crate::signing::KeyVaultError> {
        Ok(Self::new(public_key.decoding_key()?, public_key.algorithm()))
    }

    fn verify(&self, token: &str) -> Result<AuthClaims, jsonwebtoken::errors::Error> {
        AuthClaims::from_bearer_token(token, &self.key, self.algorithm)
    }
}

/// Shared state of the upload API.
pub struct ExposedApiState {
    pub validator: Arc<dyn RequestValidator>,
    pub pipeline: Arc<InsertionPipeline>,
    /// Without a verifier every caller is anonymous.
    pub bearer: Option<BearerVerifier>,
    pub signer: Arc<ResponseSigner>,
    pub local_origin: String,
    pub request_min_duration: Duration,
}

/// Upload body as sent by the app.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GaenRequest {
    pub gaen_keys: Vec<GaenKey>,
}

/// Identical for real and decoy uploads.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UploadResponse {
    pub received: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    fn new(error: &str, message: impl Into<String>) -> Self {
        Self {
            error: error.to_string(),
            message: message.into(),
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status = match self.error.as_str() {
            "authentication_failed" => StatusCode::UNAUTHORIZED,
            "invalid_request" => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

impl From<ValidationError> for ErrorResponse {
    fn from(e: ValidationError) -> Self {
        ErrorResponse::new("invalid_request", e.to_string())
    }
}

pub fn router(state: Arc<ExposedApiState>) -> Router {
    let signer = state.signer.clone();
    Router::new()
        .route("/v1/gaen/exposed", post(upload_exposed))
        .route("/v1/signing-key", get(signing_key))
        .with_state(state)
        .layer(middleware::from_fn_with_state(signer, sign_response))
}

fn authenticate(
    state: &ExposedApiState,
    headers: &HeaderMap,
) -> Result<Authentication, ErrorResponse> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match (&state.bearer, token) {
        (None, _) => Ok(Authentication::Anonymous),
        (Some(_), None) => Err(ErrorResponse::new(
            "authentication_failed",
            "missing bearer token",
        )),
        (Some(verifier), Some(token)) => verifier
            .verify(token.trim())
            .map(Authentication::Claims)
            .map_err(|e| {
                warn!("Rejected bearer token: {}", e);
                ErrorResponse::new("authentication_failed", "invalid bearer token")
            }),
    }
}

/// POST /v1/gaen/exposed
///
/// Every key is validated whether the upload is a decoy or not. Real keys are
/// stored first; the answer is then delayed to the configured minimum
/// duration, so persistence time does not tell real and decoy uploads apart.
pub async fn upload_exposed(
    State(state): State<Arc<ExposedApiState>>,
    headers: HeaderMap,
    Json(request): Json<GaenRequest>,
) -> Result<Json<UploadResponse>, ErrorResponse> {
    let now = UtcInstant::now();

    let outcome = match check_upload(&state, &headers, &request, now) {
        Ok(real_keys) => store_keys(&state, real_keys, now).await,
        Err(e) => Err(e),
    };

    if let Err(e) = now
        .normalize_duration_async(state.request_min_duration)
        .await
    {
        warn!("Upload exceeded its minimum duration: {}", e);
    }

    outcome.map(|()| {
        Json(UploadResponse {
            received: request.gaen_keys.len(),
        })
    })
}

async fn store_keys(
    state: &ExposedApiState,
    real_keys: Vec<GaenKey>,
    now: UtcInstant,
) -> Result<(), ErrorResponse> {
    if real_keys.is_empty() {
        return Ok(());
    }

    let received = real_keys.len();
    let batch: Vec<GaenKeyForInterops> = real_keys
        .into_iter()
        .map(|key| GaenKeyForInterops::new(key, state.local_origin.clone(), now))
        .collect();
    let batch_tag = format!("{}-{}", state.local_origin, now.millis());
    match state
        .pipeline
        .insert_into_database(batch, now, &batch_tag)
        .await
    {
        Ok(report) => {
            info!(
                "Upload stored {} of {} keys",
                report.persisted_total(),
                received
            );
            Ok(())
        }
        Err(e) => {
            error!("Failed to store upload: {}", e);
            Err(ErrorResponse::new("persistence_failed", "could not store keys"))
        }
    }
}

/// Returns the keys to store: empty for a decoy upload.
fn check_upload(
    state: &ExposedApiState,
    headers: &HeaderMap,
    request: &GaenRequest,
    now: UtcInstant,
) -> Result<Vec<GaenKey>, ErrorResponse> {
    let auth = authenticate(state, headers)?;
    if !state.validator.is_valid(&auth) {
        warn!("Upload rejected: caller may not submit keys");
        return Err(ErrorResponse::new(
            "authentication_failed",
            "not allowed to submit keys",
        ));
    }

    let mut real_keys = Vec::with_capacity(request.gaen_keys.len());
    for key in &request.gaen_keys {
        state.validator.get_key_date(now, &auth, Some(key))?;
        if !state.validator.is_fake_request(&auth, Some(key))? {
            real_keys.push(key.clone());
        }
    }
    Ok(real_keys)
}

/// GET /v1/signing-key
pub async fn signing_key(
    State(state): State<Arc<ExposedApiState>>,
) -> Result<String, ErrorResponse> {
    state.signer.public_key().to_pem().map_err(|e| {
        error!("Failed to export signing key: {}", e);
        ErrorResponse::new("internal_error", "signing key unavailable")
    })
}
