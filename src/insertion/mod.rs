//! Key insertion pipeline and federation bookkeeping.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────┐   ┌─────────┐   ┌──────────────────────┐
//! │ upload / EFGS│──▶│ modifiers │──▶│ filters │──▶│ group by origin      │
//! │  batch       │   │ (ordered) │   │(ordered)│   │ ─▶ InteropsDataService│
//! └──────────────┘   └───────────┘   └─────────┘   └──────────────────────┘
//!        │
//!        ▼
//! ┌──────────────────┐
//! │ FederationSyncLog│  Started ─▶ Finished | Failed
//! └──────────────────┘
//! ```

pub mod data_service;
pub mod error;
pub mod federation;
pub mod filters;
pub mod modifiers;
pub mod pipeline;
pub mod sync_log;

pub use data_service::{InMemoryDataService, InteropsDataService, StoredExposee};
pub use error::{GatewayError, InsertionError, PersistenceError};
pub use federation::{DownloadedBatch, FederationGateway, FederationSync};
pub use filters::{
    FakeKeysFilter, KeyInsertionFilter, OriginFilter, RetentionFilter, ValidRollingPeriodFilter,
};
pub use modifiers::{
    DefaultOriginModifier, KeyDataSanitizer, KeyInsertionModifier, SymptomOnsetModifier,
};
pub use pipeline::{InsertionPipeline, InsertionPipelineBuilder, InsertionReport};
pub use sync_log::{FederationSyncLog, FederationSyncLogEntry, SyncAction, SyncState};
