//! Persistence boundary for federated key batches.

use crate::insertion::error::PersistenceError;
use crate::model::GaenKeyForInterops;
use crate::time::UtcInstant;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Storage collaborator the insertion pipeline writes into.
///
/// Implementations must make `upsert_exposees_from_interops` idempotent per
/// `(origin, batch_tag)` so gateways can re-deliver a batch safely.
#[async_trait]
pub trait InteropsDataService: Send + Sync {
    async fn upsert_exposees_from_interops(
        &self,
        keys: &[GaenKeyForInterops],
        now: UtcInstant,
        origin: &str,
        batch_tag: &str,
    ) -> Result<(), PersistenceError>;
}

/// A key as stored by [`InMemoryDataService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredExposee {
    pub key: GaenKeyForInterops,
    pub batch_tag: String,
    pub stored_at: UtcInstant,
}

/// Process-local store keyed by `(origin, key data)`.
#[derive(Default)]
pub struct InMemoryDataService {
    exposees: RwLock<HashMap<(String, String), StoredExposee>>,
}

impl InMemoryDataService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.exposees.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.exposees.read().await.is_empty()
    }

    /// All stored keys of one origin, ordered by key data.
    pub async fn exposees_for_origin(&self, origin: &str) -> Vec<StoredExposee> {
        let guard = self.exposees.read().await;
        let mut stored: Vec<StoredExposee> = guard
            .iter()
            .filter(|((key_origin, _), _)| key_origin == origin)
            .map(|(_, exposee)| exposee.clone())
            .collect();
        stored.sort_by(|a, b| a.key.gaen_key.key_data.cmp(&b.key.gaen_key.key_data));
        stored
    }
}

#[async_trait]
impl InteropsDataService for InMemoryDataService {
    async fn upsert_exposees_from_interops(
        &self,
        keys: &[GaenKeyForInterops],
        now: UtcInstant,
        origin: &str,
        batch_tag: &str,
    ) -> Result<(), PersistenceError> {
        if let Some(stray) = keys.iter().find(|k| k.origin != origin) {
            return Err(PersistenceError::Rejected(format!(
                "key with origin {} in batch for {}",
                stray.origin, origin
            )));
        }

        let mut guard = self.exposees.write().await;
        for key in keys {
            guard.insert(
                (origin.to_string(), key.gaen_key.key_data.clone()),
                StoredExposee {
                    key: key.clone(),
                    batch_tag: batch_tag.to_string(),
                    stored_at: now,
                },
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GaenKey;

    fn key(data: &str, origin: &str) -> GaenKeyForInterops {
        GaenKeyForInterops::new(GaenKey::new(data, 2650000), origin, UtcInstant::from_millis(0))
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let service = InMemoryDataService::new();
        let batch = vec![key("a", "CH"), key("b", "CH")];
        let now = UtcInstant::from_millis(1_000);

        service
            .upsert_exposees_from_interops(&batch, now, "CH", "tag-1")
            .await
            .unwrap();
        service
            .upsert_exposees_from_interops(&batch, now, "CH", "tag-1")
            .await
            .unwrap();

        assert_eq!(service.len().await, 2);
        assert_eq!(service.exposees_for_origin("CH").await.len(), 2);
        assert!(service.exposees_for_origin("DE").await.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_rejects_mixed_origins() {
        let service = InMemoryDataService::new();
        let batch = vec![key("a", "CH"), key("b", "DE")];
        let result = service
            .upsert_exposees_from_interops(&batch, UtcInstant::from_millis(0), "CH", "tag")
            .await;
        assert!(matches!(result, Err(PersistenceError::Rejected(_))));
        assert!(service.is_empty().await);
    }
}
