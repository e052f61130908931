//! Preservation job orchestration engine.
//!
//! A job runs one preservation plugin over a selection of archived objects.
//! The [`orchestrator::JobOrchestrator`] resolves the selection, fans batches
//! out to a [`worker::WorkerPool`] whose workers each own a cloned plugin
//! instance, and folds per-object outcomes into a durable report through the
//! [`progress::ProgressAggregator`].

pub mod broadcast;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod notify;
pub mod orchestrator;
pub mod plugin;
pub mod progress;
pub mod retrieval;
pub mod selection;
pub mod store;
pub mod worker;

pub use broadcast::{JobProgressBroadcaster, JobProgressEvent};
pub use catalog::{CatalogEntry, CatalogError, MemoryCatalog};
pub use config::{load_config, EngineConfig};
pub use error::{ArchivistError, ConfigError, OrchestratorError, Result, WorkerError};
pub use model::{
    ArchivedObject, Job, JobState, JobStats, ObjectType, PluginState, PluginType, Report,
    ReportItem, SelectedObjects,
};
pub use notify::{JobNotifier, NoopNotifier, WebhookNotifier};
pub use orchestrator::{JobHandle, JobOrchestrator, JobRequest, OrchestratorSettings};
pub use plugin::{Plugin, PluginError, PluginRegistry};
pub use progress::{ProgressAggregator, ProgressCounters};
pub use retrieval::{ObjectRetrieval, RetrievalError, RetrievedObject};
pub use selection::{Filter, FilterParameter, ObjectIndex, SelectionError, SelectionResolver};
pub use store::{JobStore, MemoryJobStore, StoreError};
