//! Batch exchange with federation gateways.

use crate::insertion::error::{GatewayError, InsertionError};
use crate::insertion::pipeline::{InsertionPipeline, InsertionReport};
use crate::insertion::sync_log::{FederationSyncLog, SyncAction};
use crate::model::GaenKeyForInterops;
use crate::time::UtcInstant;
use async_trait::async_trait;
use log::{error, info};
use std::collections::HashSet;
use std::sync::Arc;

/// One batch as served by a gateway.
#[derive(Debug, Clone)]
pub struct DownloadedBatch {
    pub batch_tag: String,
    /// Tag of the following batch of the same day, if any.
    pub next_batch_tag: Option<String>,
    pub keys: Vec<GaenKeyForInterops>,
}

/// A partner backend exchanging key batches.
#[async_trait]
pub trait FederationGateway: Send + Sync {
    fn name(&self) -> &str;

    /// Fetches the batch `batch_tag` of `date`, or the first batch of the day
    /// when no tag is given.
    async fn download(
        &self,
        date: UtcInstant,
        batch_tag: Option<&str>,
    ) -> Result<DownloadedBatch, GatewayError>;

    async fn upload(
        &self,
        batch_tag: &str,
        keys: &[GaenKeyForInterops],
    ) -> Result<(), GatewayError>;
}

/// Drives downloads into the insertion pipeline and uploads out of it,
/// keeping the sync log current for every attempt.
pub struct FederationSync {
    gateway: Arc<dyn FederationGateway>,
    pipeline: Arc<InsertionPipeline>,
    sync_log: Arc<FederationSyncLog>,
}

impl FederationSync {
    pub fn new(
        gateway: Arc<dyn FederationGateway>,
        pipeline: Arc<InsertionPipeline>,
        sync_log: Arc<FederationSyncLog>,
    ) -> Self {
        Self {
            gateway,
            pipeline,
            sync_log,
        }
    }

    /// Walks the batch chain of `date` and imports every batch not yet
    /// processed. Returns the reports of the batches imported by this call.
    pub async fn download_day(
        &self,
        date: UtcInstant,
        now: UtcInstant,
    ) -> Result<Vec<InsertionReport>, InsertionError> {
        let gateway = self.gateway.name().to_string();
        let date = date.at_start_of_day();
        let mut reports = Vec::new();
        let mut seen = HashSet::new();
        let mut next: Option<String> = None;

        loop {
            let batch = match self.gateway.download(date, next.as_deref()).await {
                Ok(batch) => batch,
                Err(e) => {
                    error!("Download from {} failed: {}", gateway, e);
                    if let Some(tag) = &next {
                        let id = self
                            .sync_log
                            .start(&gateway, SyncAction::Download, tag, date)
                            .await;
                        self.sync_log.fail(id).await?;
                    }
                    return Err(e.into());
                }
            };

            if !seen.insert(batch.batch_tag.clone()) {
                info!("Batch chain of {} loops at {}", gateway, batch.batch_tag);
                break;
            }

            if let Some(report) = self
                .pipeline
                .import_batch(
                    &self.sync_log,
                    &gateway,
                    &batch.batch_tag,
                    date,
                    batch.keys,
                    now,
                )
                .await?
            {
                reports.push(report);
            }

            match batch.next_batch_tag {
                Some(tag) => next = Some(tag),
                None => break,
            }
        }

        Ok(reports)
    }

    /// Uploads `keys` under `batch_tag` unless that tag was already uploaded.
    /// Returns whether an upload happened.
    pub async fn upload_batch(
        &self,
        batch_tag: &str,
        upload_date: UtcInstant,
        keys: &[GaenKeyForInterops],
    ) -> Result<bool, InsertionError> {
        let gateway = self.gateway.name().to_string();
        if self
            .sync_log
            .is_processed(&gateway, SyncAction::Upload, batch_tag)
            .await
        {
            info!("Batch {} already uploaded to {}", batch_tag, gateway);
            return Ok(false);
        }

        self.sync_log
            .record(&gateway, SyncAction::Upload, batch_tag, upload_date, async {
                self.gateway
                    .upload(batch_tag, keys)
                    .await
                    .map_err(InsertionError::from)
            })
            .await?;
        info!("Uploaded {} keys to {} as {}", keys.len(), gateway, batch_tag);
        Ok(true)
    }
}
