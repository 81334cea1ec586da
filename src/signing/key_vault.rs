//! Registry of signing key pairs.
//!
//! Entries are loaded once at startup and never change afterwards. Decoding
//! providers are keyed by algorithm tag; the provider tables sit behind an
//! `RwLock` so registration (single writer) can coexist with lookups.

use crate::signing::error::KeyVaultError;
use crate::signing::providers::{
    EncodingProvider, KeyMaterial, MaterialKind, PrivateKeyMaterial, ProviderCatalog,
    PublicKeyMaterial, EC_PRIVATE, EC_PUBLIC, RSA_PRIVATE, RSA_PUBLIC,
};
use log::{debug, warn};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Algorithm tag of P-256 entries.
pub const ALGORITHM_EC: &str = "EC";

/// Algorithm tag of RSA entries.
pub const ALGORITHM_RSA: &str = "RSA";

/// Stored key pair material for one identifier.
#[derive(Clone)]
pub struct KeyVaultEntry {
    pub id: String,
    pub private_material: Vec<u8>,
    pub public_material: Vec<u8>,
    pub algorithm: String,
}

impl KeyVaultEntry {
    pub fn new(
        id: impl Into<String>,
        private_material: impl Into<Vec<u8>>,
        public_material: impl Into<Vec<u8>>,
        algorithm: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            private_material: private_material.into(),
            public_material: public_material.into(),
            algorithm: algorithm.into(),
        }
    }
}

impl std::fmt::Debug for KeyVaultEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyVaultEntry")
            .field("id", &self.id)
            .field("algorithm", &self.algorithm)
            .field("private_material", &"[REDACTED]")
            .finish()
    }
}

/// One element of the JSON bootstrap list.
#[derive(Debug, Deserialize)]
struct BootstrapEntry {
    id: String,
    private: String,
    public: String,
    algorithm: String,
}

/// Usable key pair resolved from an entry.
#[derive(Debug)]
pub struct KeyPair {
    pub id: String,
    pub private: PrivateKeyMaterial,
    pub public: PublicKeyMaterial,
}

type ProviderTable = RwLock<HashMap<String, EncodingProvider>>;

pub struct KeyVault {
    entries: HashMap<String, KeyVaultEntry>,
    catalog: ProviderCatalog,
    public_providers: ProviderTable,
    private_providers: ProviderTable,
}

impl KeyVault {
    /// Vault with the EC and RSA providers registered.
    pub fn new(entries: Vec<KeyVaultEntry>) -> Self {
        let vault = Self::without_providers(entries, ProviderCatalog::builtin());
        vault.register_private_encoding_provider(ALGORITHM_EC, EC_PRIVATE);
        vault.register_public_encoding_provider(ALGORITHM_EC, EC_PUBLIC);
        vault.register_private_encoding_provider(ALGORITHM_RSA, RSA_PRIVATE);
        vault.register_public_encoding_provider(ALGORITHM_RSA, RSA_PUBLIC);
        vault
    }

    /// Vault with no providers registered; they can be added from `catalog`.
    pub fn without_providers(entries: Vec<KeyVaultEntry>, catalog: ProviderCatalog) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|entry| (entry.id.clone(), entry))
                .collect(),
            catalog,
            public_providers: RwLock::new(HashMap::new()),
            private_providers: RwLock::new(HashMap::new()),
        }
    }

    /// Parses a JSON list of `{id, private, public, algorithm}` objects.
    pub fn from_bootstrap_json(json: &str) -> Result<Self, KeyVaultError> {
        let parsed: Vec<BootstrapEntry> =
            serde_json::from_str(json).map_err(|e| KeyVaultError::InvalidFormat(e.to_string()))?;
        Ok(Self::new(
            parsed
                .into_iter()
                .map(|e| KeyVaultEntry::new(e.id, e.private, e.public, e.algorithm))
                .collect(),
        ))
    }

    /// Registers the catalog provider `provider` for public keys of
    /// `algorithm`. Returns `false` and changes nothing if the provider is
    /// unknown, decodes private keys, or the algorithm already has one.
    pub fn register_public_encoding_provider(&self, algorithm: &str, provider: &str) -> bool {
        self.register(&self.public_providers, MaterialKind::Public, algorithm, provider)
    }

    /// Private-key counterpart of
    /// [`register_public_encoding_provider`](Self::register_public_encoding_provider).
    pub fn register_private_encoding_provider(&self, algorithm: &str, provider: &str) -> bool {
        self.register(&self.private_providers, MaterialKind::Private, algorithm, provider)
    }

    fn register(
        &self,
        table: &ProviderTable,
        kind: MaterialKind,
        algorithm: &str,
        provider_name: &str,
    ) -> bool {
        let provider = match self.catalog.lookup(provider_name) {
            Some(provider) => provider,
            None => {
                warn!("Unknown encoding provider {}", provider_name);
                return false;
            }
        };
        if provider.produces() != kind {
            warn!(
                "Provider {} decodes {:?} keys, expected {:?}",
                provider_name,
                provider.produces(),
                kind
            );
            return false;
        }

        let tag = algorithm.to_ascii_uppercase();
        let mut guard = table.write().unwrap_or_else(PoisonError::into_inner);
        if guard.contains_key(&tag) {
            debug!("{:?} provider for {} already registered", kind, tag);
            return false;
        }
        guard.insert(tag, provider);
        true
    }

    /// Number of registered (public, private) providers.
    pub fn provider_counts(&self) -> (usize, usize) {
        (
            self.public_providers
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
            self.private_providers
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
        )
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Resolves both halves of the entry `id` and checks they belong together.
    pub fn get(&self, id: &str) -> Result<KeyPair, KeyVaultError> {
        let entry = self
            .entries
            .get(id)
            .ok_or_else(|| KeyVaultError::NoEntry(id.to_string()))?;

        let private = match self
            .provider(&self.private_providers, &entry.algorithm)?
            .decode(&entry.private_material)?
        {
            KeyMaterial::Private(material) => material,
            KeyMaterial::Public(_) => {
                return Err(KeyVaultError::InvalidFormat(format!(
                    "entry {} private material decoded as public key",
                    id
                )))
            }
        };
        let public = self.decode_public(entry)?;

        if private.public_key() != public {
            return Err(KeyVaultError::KeyMismatch(id.to_string()));
        }

        Ok(KeyPair {
            id: entry.id.clone(),
            private,
            public,
        })
    }

    /// Resolves only the public half of the entry `id`.
    pub fn public_key(&self, id: &str) -> Result<PublicKeyMaterial, KeyVaultError> {
        let entry = self
            .entries
            .get(id)
            .ok_or_else(|| KeyVaultError::NoEntry(id.to_string()))?;
        self.decode_public(entry)
    }

    fn decode_public(&self, entry: &KeyVaultEntry) -> Result<PublicKeyMaterial, KeyVaultError> {
        match self
            .provider(&self.public_providers, &entry.algorithm)?
            .decode(&entry.public_material)?
        {
            KeyMaterial::Public(material) => Ok(material),
            KeyMaterial::Private(_) => Err(KeyVaultError::InvalidFormat(format!(
                "entry {} public material decoded as private key",
                entry.id
            ))),
        }
    }

    fn provider(
        &self,
        table: &ProviderTable,
        algorithm: &str,
    ) -> Result<EncodingProvider, KeyVaultError> {
        let tag = algorithm.to_ascii_uppercase();
        table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&tag)
            .copied()
            .ok_or(KeyVaultError::NoProvider(tag))
    }
}
