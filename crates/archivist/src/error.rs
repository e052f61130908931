use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchivistError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Selection error: {0}")]
    Selection(#[from] crate::selection::SelectionError),

    #[error("Plugin error: {0}")]
    Plugin(#[from] crate::plugin::PluginError),

    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] crate::catalog::CatalogError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("Logging error: {0}")]
    Logging(#[from] crate::logging::LoggingError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker pool needs at least one plugin instance")]
    NoWorkers,
}

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Failed to persist job: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("Failed to spawn job thread: {0}")]
    SpawnFailed(String),

    #[error("Job thread for '{0}' panicked")]
    JobThreadPanicked(String),
}

pub type Result<T> = std::result::Result<T, ArchivistError>;
