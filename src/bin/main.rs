use gaen_trust::insertion::{
    DefaultOriginModifier, FakeKeysFilter, InMemoryDataService, InsertionPipeline,
    KeyDataSanitizer, RetentionFilter, ValidRollingPeriodFilter,
};
use gaen_trust::modules::exposed_api::{router, BearerVerifier, ExposedApiState};
use gaen_trust::settings::ServerSettings;
use gaen_trust::signing::{KeyVault, KeyVaultEntry, PublicKeyMaterial, ResponseSigner};
use gaen_trust::validation::{ClaimValidator, PermissiveValidator, RequestValidator};
use log::{info, warn};
use p256::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use p256::SecretKey;
use rand_core::OsRng;
use std::error::Error;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Initialize logging
    env_logger::init();

    // Load configuration
    let settings = ServerSettings::from_env()?;

    let vault = load_key_vault(&settings)?;
    let signer = Arc::new(ResponseSigner::new(&vault, settings.signing_config())?);
    info!("Signing responses with key {}", settings.signing_key_id);

    let (validator, bearer) = match &settings.auth_public_key_path {
        Some(path) => {
            let public = PublicKeyMaterial::decode(&fs::read(path)?)?;
            info!("Verifying upload tokens with {}", path);
            let validator: Arc<dyn RequestValidator> =
                Arc::new(ClaimValidator::new(settings.validator_config()));
            (validator, Some(BearerVerifier::from_public_key(&public)?))
        }
        None => {
            warn!("AUTH_PUBLIC_KEY_PATH not set, accepting unauthenticated uploads");
            let validator: Arc<dyn RequestValidator> =
                Arc::new(PermissiveValidator::new(settings.rolling_period()));
            (validator, None)
        }
    };

    let pipeline = InsertionPipeline::builder(Arc::new(InMemoryDataService::new()))
        .modifier(KeyDataSanitizer)
        .modifier(DefaultOriginModifier::new(settings.local_origin.clone()))
        .filter(FakeKeysFilter)
        .filter(ValidRollingPeriodFilter)
        .filter(RetentionFilter::new(
            settings.rolling_period(),
            settings.retention(),
        ))
        .build();

    let state = Arc::new(ExposedApiState {
        validator,
        pipeline: Arc::new(pipeline),
        bearer,
        signer,
        local_origin: settings.local_origin.clone(),
        request_min_duration: settings.request_min_duration(),
    });

    let listener = TcpListener::bind(("0.0.0.0", settings.port)).await?;
    info!("Listening on: {}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

fn load_key_vault(settings: &ServerSettings) -> Result<KeyVault, Box<dyn Error>> {
    let path = Path::new(&settings.key_vault_path);
    if path.exists() {
        let vault = KeyVault::from_bootstrap_json(&fs::read_to_string(path)?)?;
        if !vault.contains(&settings.signing_key_id) {
            return Err(format!(
                "key vault {} has no entry {}",
                settings.key_vault_path, settings.signing_key_id
            )
            .into());
        }
        return Ok(vault);
    }

    warn!(
        "Key vault {} not found, generating an ephemeral signing key",
        settings.key_vault_path
    );
    let secret = SecretKey::random(&mut OsRng);
    let private = secret
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| e.to_string())?;
    let public = secret
        .public_key()
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| e.to_string())?;
    Ok(KeyVault::new(vec![KeyVaultEntry::new(
        settings.signing_key_id.clone(),
        private.as_bytes(),
        public,
        "EC",
    )]))
}
