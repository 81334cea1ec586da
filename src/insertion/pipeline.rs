//! Ordered modifier/filter pipeline in front of key persistence.

use crate::insertion::data_service::InteropsDataService;
use crate::insertion::error::InsertionError;
use crate::insertion::filters::KeyInsertionFilter;
use crate::insertion::modifiers::KeyInsertionModifier;
use crate::insertion::sync_log::{FederationSyncLog, SyncAction};
use crate::model::GaenKeyForInterops;
use crate::time::UtcInstant;
use log::{debug, info};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Outcome of one [`InsertionPipeline::insert_into_database`] call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InsertionReport {
    pub received: usize,
    /// Batch size after all modifiers ran.
    pub after_modifiers: usize,
    /// Entries removed by each filter, in pipeline order.
    pub removed_by_filter: Vec<(&'static str, usize)>,
    /// Entries handed to persistence per origin.
    pub persisted: BTreeMap<String, usize>,
}

impl InsertionReport {
    pub fn persisted_total(&self) -> usize {
        self.persisted.values().sum()
    }
}

/// Sanitizes key batches and stores them grouped by origin.
///
/// Modifiers run first, then filters, both in registration order; a filter
/// can rely on normalization done by any modifier.
pub struct InsertionPipeline {
    data_service: Arc<dyn InteropsDataService>,
    modifiers: Vec<Box<dyn KeyInsertionModifier>>,
    filters: Vec<Box<dyn KeyInsertionFilter>>,
}

impl InsertionPipeline {
    pub fn builder(data_service: Arc<dyn InteropsDataService>) -> InsertionPipelineBuilder {
        InsertionPipelineBuilder {
            data_service,
            modifiers: Vec::new(),
            filters: Vec::new(),
        }
    }

    /// Runs the batch through the pipeline and persists the survivors.
    ///
    /// Origin groups are stored one after the other. A persistence failure is
    /// returned as is; groups stored before it are not rolled back.
    pub async fn insert_into_database(
        &self,
        keys: Vec<GaenKeyForInterops>,
        now: UtcInstant,
        batch_tag: &str,
    ) -> Result<InsertionReport, InsertionError> {
        let mut report = InsertionReport {
            received: keys.len(),
            ..InsertionReport::default()
        };
        if keys.is_empty() {
            return Ok(report);
        }

        let mut batch = keys;
        for modifier in &self.modifiers {
            batch = modifier.modify(now, batch);
            debug!("Modifier {} left {} keys", modifier.name(), batch.len());
        }
        report.after_modifiers = batch.len();

        for filter in &self.filters {
            let before = batch.len();
            batch = filter.filter(now, batch);
            let removed = before.saturating_sub(batch.len());
            if removed > 0 {
                info!("Filter {} removed {} of {} keys", filter.name(), removed, before);
            }
            report.removed_by_filter.push((filter.name(), removed));
        }

        let mut by_origin: BTreeMap<String, Vec<GaenKeyForInterops>> = BTreeMap::new();
        for key in batch {
            by_origin.entry(key.origin.clone()).or_default().push(key);
        }

        for (origin, group) in by_origin {
            debug!(
                "Upserting {} keys for origin {} batch {}",
                group.len(),
                origin,
                batch_tag
            );
            self.data_service
                .upsert_exposees_from_interops(&group, now, &origin, batch_tag)
                .await
                .map_err(|source| InsertionError::Persistence {
                    origin: origin.clone(),
                    source,
                })?;
            report.persisted.insert(origin, group.len());
        }

        info!(
            "Batch {}: received {}, persisted {}",
            batch_tag,
            report.received,
            report.persisted_total()
        );
        Ok(report)
    }

    /// Inserts a batch received from `gateway`, bracketed by a sync log
    /// entry. Returns `Ok(None)` when the batch tag was already processed.
    pub async fn import_batch(
        &self,
        sync_log: &FederationSyncLog,
        gateway: &str,
        batch_tag: &str,
        upload_date: UtcInstant,
        keys: Vec<GaenKeyForInterops>,
        now: UtcInstant,
    ) -> Result<Option<InsertionReport>, InsertionError> {
        if sync_log
            .is_processed(gateway, SyncAction::Download, batch_tag)
            .await
        {
            info!("Batch {} from {} already processed", batch_tag, gateway);
            return Ok(None);
        }

        let keys = keys
            .into_iter()
            .map(|key| key.with_batch_tag(batch_tag))
            .collect();

        sync_log
            .record(
                gateway,
                SyncAction::Download,
                batch_tag,
                upload_date,
                self.insert_into_database(keys, now, batch_tag),
            )
            .await
            .map(Some)
    }
}

/// Collects modifiers and filters in the order they will run.
pub struct InsertionPipelineBuilder {
    data_service: Arc<dyn InteropsDataService>,
    modifiers: Vec<Box<dyn KeyInsertionModifier>>,
    filters: Vec<Box<dyn KeyInsertionFilter>>,
}

impl InsertionPipelineBuilder {
    pub fn modifier(mut self, modifier: impl KeyInsertionModifier + 'static) -> Self {
        self.modifiers.push(Box::new(modifier));
        self
    }

    pub fn filter(mut self, filter: impl KeyInsertionFilter + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    pub fn build(self) -> InsertionPipeline {
        InsertionPipeline {
            data_service: self.data_service,
            modifiers: self.modifiers,
            filters: self.filters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insertion::data_service::InMemoryDataService;
    use crate::insertion::error::PersistenceError;
    use crate::insertion::filters::OriginFilter;
    use crate::insertion::modifiers::DefaultOriginModifier;
    use crate::insertion::sync_log::SyncState;
    use crate::model::GaenKey;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingDataService {
        calls: Mutex<Vec<(String, String, usize)>>,
        fail_origin: Option<String>,
    }

    #[async_trait]
    impl InteropsDataService for RecordingDataService {
        async fn upsert_exposees_from_interops(
            &self,
            keys: &[GaenKeyForInterops],
            _now: UtcInstant,
            origin: &str,
            batch_tag: &str,
        ) -> Result<(), PersistenceError> {
            if self.fail_origin.as_deref() == Some(origin) {
                return Err(PersistenceError::Unavailable("disk full".to_string()));
            }
            self.calls
                .lock()
                .await
                .push((origin.to_string(), batch_tag.to_string(), keys.len()));
            Ok(())
        }
    }

    fn key(data: &str, origin: &str) -> GaenKeyForInterops {
        GaenKeyForInterops::new(GaenKey::new(data, 2650000), origin, UtcInstant::from_millis(0))
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let service = Arc::new(RecordingDataService::default());
        let pipeline = InsertionPipeline::builder(service.clone()).build();
        let report = pipeline
            .insert_into_database(Vec::new(), UtcInstant::now(), "tag")
            .await
            .unwrap();
        assert_eq!(report, InsertionReport::default());
        assert!(service.calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_modifier_runs_before_filter() {
        let service = Arc::new(RecordingDataService::default());
        let pipeline = InsertionPipeline::builder(service.clone())
            .modifier(DefaultOriginModifier::new("CH"))
            .filter(OriginFilter::allowing(["CH"]))
            .build();

        let report = pipeline
            .insert_into_database(vec![key("a", ""), key("b", "DE")], UtcInstant::now(), "tag")
            .await
            .unwrap();

        assert_eq!(report.removed_by_filter, vec![("origin", 1)]);
        assert_eq!(
            *service.calls.lock().await,
            vec![("CH".to_string(), "tag".to_string(), 1)]
        );
    }

    #[tokio::test]
    async fn test_failure_keeps_earlier_groups() {
        let service = Arc::new(RecordingDataService {
            fail_origin: Some("DE".to_string()),
            ..RecordingDataService::default()
        });
        let pipeline = InsertionPipeline::builder(service.clone()).build();

        let result = pipeline
            .insert_into_database(
                vec![key("a", "CH"), key("b", "DE"), key("c", "IT")],
                UtcInstant::now(),
                "tag",
            )
            .await;

        match result {
            Err(InsertionError::Persistence { origin, .. }) => assert_eq!(origin, "DE"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(
            *service.calls.lock().await,
            vec![("CH".to_string(), "tag".to_string(), 1)]
        );
    }

    #[tokio::test]
    async fn test_import_batch_is_idempotent() {
        let service = Arc::new(InMemoryDataService::new());
        let pipeline = InsertionPipeline::builder(service.clone()).build();
        let log = FederationSyncLog::new();
        let now = UtcInstant::now();

        let first = pipeline
            .import_batch(&log, "efgs", "tag-1", now, vec![key("a", "DE")], now)
            .await
            .unwrap();
        assert_eq!(first.map(|r| r.persisted_total()), Some(1));

        let second = pipeline
            .import_batch(&log, "efgs", "tag-1", now, vec![key("a", "DE")], now)
            .await
            .unwrap();
        assert!(second.is_none());

        let stored = service.exposees_for_origin("DE").await;
        assert_eq!(stored[0].key.batch_tag.as_deref(), Some("tag-1"));
        assert_eq!(log.entries().await.len(), 1);
    }

    #[tokio::test]
    async fn test_import_batch_logs_failure() {
        let service = Arc::new(RecordingDataService {
            fail_origin: Some("DE".to_string()),
            ..RecordingDataService::default()
        });
        let pipeline = InsertionPipeline::builder(service).build();
        let log = FederationSyncLog::new();
        let now = UtcInstant::now();

        let result = pipeline
            .import_batch(&log, "efgs", "tag-1", now, vec![key("a", "DE")], now)
            .await;
        assert!(result.is_err());

        let entries = log.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].state, SyncState::Failed);
        assert_eq!(
            log.outstanding_batch_tags("efgs", SyncAction::Download).await,
            vec!["tag-1".to_string()]
        );
    }
}
