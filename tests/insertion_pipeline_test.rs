use async_trait::async_trait;
use gaen_trust::insertion::{
    FederationSyncLog, InMemoryDataService, InsertionPipeline, InteropsDataService, OriginFilter,
    PersistenceError, RetentionFilter, SyncAction, SyncState,
};
use gaen_trust::model::{GaenKey, GaenKeyForInterops};
use gaen_trust::time::UtcInstant;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
struct RecordingDataService {
    upserts: Mutex<Vec<(String, String, usize)>>,
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
        self.upserts
            .lock()
            .await
            .push((origin.to_string(), batch_tag.to_string(), keys.len()));
        Ok(())
    }
}

fn key(key_data: &str, origin: &str, now: UtcInstant) -> GaenKeyForInterops {
    let rsn = now.minus_days(1).at_start_of_day().get_ten_minutes_since_1970() as i32;
    GaenKeyForInterops::new(GaenKey::new(key_data, rsn), origin, now)
}

fn mixed_batch(now: UtcInstant) -> Vec<GaenKeyForInterops> {
    vec![
        key("AQEBAQEBAQEBAQEBAQEBAQ==", "CH", now),
        key("AgICAgICAgICAgICAgICAg==", "CH", now),
        key("AwMDAwMDAwMDAwMDAwMDAw==", "DE", now),
    ]
}

#[tokio::test]
async fn test_batch_is_grouped_by_origin() {
    let now = UtcInstant::now();
    let service = Arc::new(RecordingDataService::default());
    let pipeline = InsertionPipeline::builder(service.clone()).build();

    let report = pipeline
        .insert_into_database(mixed_batch(now), now, "batch-1")
        .await
        .unwrap();

    let mut upserts = service.upserts.lock().await.clone();
    upserts.sort();
    assert_eq!(
        upserts,
        vec![
            ("CH".to_string(), "batch-1".to_string(), 2),
            ("DE".to_string(), "batch-1".to_string(), 1),
        ]
    );
    assert_eq!(report.persisted_total(), 3);
}

#[tokio::test]
async fn test_origin_filter_drops_group() {
    let now = UtcInstant::now();
    let service = Arc::new(RecordingDataService::default());
    let pipeline = InsertionPipeline::builder(service.clone())
        .filter(OriginFilter::rejecting(["DE"]))
        .build();

    let report = pipeline
        .insert_into_database(mixed_batch(now), now, "batch-1")
        .await
        .unwrap();

    assert_eq!(
        *service.upserts.lock().await,
        vec![("CH".to_string(), "batch-1".to_string(), 2)]
    );
    assert_eq!(report.removed_by_filter, vec![("origin", 1)]);
}

#[tokio::test]
async fn test_retention_filter_drops_old_keys() {
    let now = UtcInstant::now();
    let service = Arc::new(RecordingDataService::default());
    let pipeline = InsertionPipeline::builder(service.clone())
        .filter(RetentionFilter::default())
        .build();

    let mut old = key("BAQEBAQEBAQEBAQEBAQEBA==", "CH", now);
    old.gaen_key.rolling_start_number =
        now.minus_days(20).at_start_of_day().get_ten_minutes_since_1970() as i32;
    let mut batch = mixed_batch(now);
    batch.push(old);

    let report = pipeline
        .insert_into_database(batch, now, "batch-1")
        .await
        .unwrap();
    assert_eq!(report.persisted_total(), 3);
}

#[tokio::test]
async fn test_import_batch_is_processed_once() {
    let now = UtcInstant::now();
    let service = Arc::new(InMemoryDataService::new());
    let pipeline = InsertionPipeline::builder(service.clone()).build();
    let sync_log = FederationSyncLog::new();
    let upload_date = now.at_start_of_day();

    let first = pipeline
        .import_batch(&sync_log, "efgs", "tag-1", upload_date, mixed_batch(now), now)
        .await
        .unwrap();
    let second = pipeline
        .import_batch(&sync_log, "efgs", "tag-1", upload_date, mixed_batch(now), now)
        .await
        .unwrap();

    assert!(first.is_some());
    assert!(second.is_none());
    assert_eq!(service.len().await, 3);
    assert!(sync_log.is_processed("efgs", SyncAction::Download, "tag-1").await);

    let entries = sync_log.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].state, SyncState::Finished);
    assert!(entries[0].end_time.is_some());

    let stored = service.exposees_for_origin("CH").await;
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|e| e.batch_tag == "tag-1"));
}
