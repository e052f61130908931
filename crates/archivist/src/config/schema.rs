use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_persist_interval_ms")]
    pub progress_persist_interval_ms: u64,
    #[serde(default = "default_index_page_size")]
    pub index_page_size: usize,
    /// Falls back to `~/.archivist/data/archivist.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub notification: Option<NotificationConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_worker_count() -> usize {
    num_cpus::get().clamp(1, 8)
}

fn default_batch_size() -> usize {
    10
}

fn default_persist_interval_ms() -> u64 {
    2000
}

fn default_index_page_size() -> usize {
    1000
}

impl EngineConfig {
    pub fn progress_persist_interval(&self) -> Duration {
        Duration::from_millis(self.progress_persist_interval_ms)
    }

    pub fn database_path(&self) -> Option<PathBuf> {
        self.database_path
            .clone()
            .or_else(crate::db::default_database_path)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            worker_count: default_worker_count(),
            batch_size: default_batch_size(),
            progress_persist_interval_ms: default_persist_interval_ms(),
            index_page_size: default_index_page_size(),
            database_path: None,
            notification: None,
            logging: LoggingConfig::default(),
        }
    }
}

/// Webhook called when a job reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub webhook_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}
