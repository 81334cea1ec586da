//! Append-only audit trail of federation sync jobs.
//!
//! Each upload or download attempt against a gateway gets exactly one entry.
//! The log is the only record an external scheduler consults to decide which
//! batch tags still need processing.

use crate::insertion::error::InsertionError;
use crate::time::UtcInstant;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Direction of a sync job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncAction {
    Upload,
    Download,
}

/// Lifecycle state of a sync job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    Started,
    Finished,
    Failed,
    /// Known to the scheduler but not attempted yet.
    Outstanding,
}

impl SyncState {
    fn as_str(&self) -> &'static str {
        match self {
            SyncState::Started => "Started",
            SyncState::Finished => "Finished",
            SyncState::Failed => "Failed",
            SyncState::Outstanding => "Outstanding",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One sync job against one gateway and batch tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FederationSyncLogEntry {
    pub id: u64,
    pub gateway: String,
    pub action: SyncAction,
    pub batch_tag: String,
    pub upload_date: UtcInstant,
    pub start_time: UtcInstant,
    pub end_time: Option<UtcInstant>,
    pub state: SyncState,
}

/// In-process sync log. Entries are never removed.
#[derive(Default)]
pub struct FederationSyncLog {
    entries: RwLock<Vec<FederationSyncLogEntry>>,
    next_id: AtomicU64,
}

impl FederationSyncLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a `Started` entry and returns its id.
    pub async fn start(
        &self,
        gateway: &str,
        action: SyncAction,
        batch_tag: &str,
        upload_date: UtcInstant,
    ) -> u64 {
        self.append(gateway, action, batch_tag, upload_date, SyncState::Started)
            .await
    }

    /// Records a batch tag the gateway announced but that was not fetched yet.
    pub async fn mark_outstanding(
        &self,
        gateway: &str,
        action: SyncAction,
        batch_tag: &str,
        upload_date: UtcInstant,
    ) -> u64 {
        self.append(gateway, action, batch_tag, upload_date, SyncState::Outstanding)
            .await
    }

    pub async fn finish(&self, id: u64) -> Result<(), InsertionError> {
        self.close(id, SyncState::Finished).await
    }

    pub async fn fail(&self, id: u64) -> Result<(), InsertionError> {
        self.close(id, SyncState::Failed).await
    }

    /// Runs `job` bracketed by a `Started` entry that ends `Finished` or
    /// `Failed` depending on the job's outcome.
    pub async fn record<T, E, F>(
        &self,
        gateway: &str,
        action: SyncAction,
        batch_tag: &str,
        upload_date: UtcInstant,
        job: F,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<InsertionError>,
    {
        let id = self.start(gateway, action, batch_tag, upload_date).await;
        match job.await {
            Ok(value) => {
                self.finish(id).await?;
                Ok(value)
            }
            Err(e) => {
                self.fail(id).await?;
                Err(e)
            }
        }
    }

    /// True once a job for this gateway, action and batch tag has finished.
    pub async fn is_processed(&self, gateway: &str, action: SyncAction, batch_tag: &str) -> bool {
        self.entries.read().await.iter().any(|entry| {
            entry.gateway == gateway
                && entry.action == action
                && entry.batch_tag == batch_tag
                && entry.state == SyncState::Finished
        })
    }

    /// Batch tags that were announced or attempted but never finished, in
    /// first-seen order.
    pub async fn outstanding_batch_tags(&self, gateway: &str, action: SyncAction) -> Vec<String> {
        let entries = self.entries.read().await;
        let mut pending: Vec<String> = Vec::new();
        for entry in entries
            .iter()
            .filter(|e| e.gateway == gateway && e.action == action)
        {
            if pending.contains(&entry.batch_tag) {
                continue;
            }
            let finished = entries.iter().any(|other| {
                other.gateway == gateway
                    && other.action == action
                    && other.batch_tag == entry.batch_tag
                    && other.state == SyncState::Finished
            });
            if !finished {
                pending.push(entry.batch_tag.clone());
            }
        }
        pending
    }

    pub async fn entries(&self) -> Vec<FederationSyncLogEntry> {
        self.entries.read().await.clone()
    }

    async fn append(
        &self,
        gateway: &str,
        action: SyncAction,
        batch_tag: &str,
        upload_date: UtcInstant,
        state: SyncState,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let entry = FederationSyncLogEntry {
            id,
            gateway: gateway.to_string(),
            action,
            batch_tag: batch_tag.to_string(),
            upload_date,
            start_time: UtcInstant::now(),
            end_time: None,
            state,
        };
        info!(
            "Sync job {} {:?} {} batch {} -> {}",
            id, action, gateway, batch_tag, state
        );
        self.entries.write().await.push(entry);
        id
    }

    async fn close(&self, id: u64, state: SyncState) -> Result<(), InsertionError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(InsertionError::UnknownSyncEntry(id))?;

        if entry.state != SyncState::Started {
            warn!("Sync job {} is {}, cannot move to {}", id, entry.state, state);
            return Err(InsertionError::InvalidTransition {
                id,
                from: entry.state.as_str(),
                to: state.as_str(),
            });
        }

        entry.state = state;
        entry.end_time = Some(UtcInstant::now());
        info!(
            "Sync job {} {:?} {} batch {} -> {}",
            id, entry.action, entry.gateway, entry.batch_tag, state
        );
        Ok(())
    }
}
