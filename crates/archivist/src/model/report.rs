//! Job reports and their per-object items.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::object::ObjectType;

/// Outcome of a plugin on one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PluginState {
    Success,
    PartialSuccess,
    Failure,
    Running,
    Skipped,
}

impl PluginState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginState::Success => "SUCCESS",
            PluginState::PartialSuccess => "PARTIAL_SUCCESS",
            PluginState::Failure => "FAILURE",
            PluginState::Running => "RUNNING",
            PluginState::Skipped => "SKIPPED",
        }
    }

    /// Counts toward the job's failure counter.
    pub fn is_failure(&self) -> bool {
        matches!(self, PluginState::Failure | PluginState::Skipped)
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, PluginState::Running)
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PluginState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SUCCESS" => Ok(PluginState::Success),
            "PARTIAL_SUCCESS" => Ok(PluginState::PartialSuccess),
            "FAILURE" => Ok(PluginState::Failure),
            "RUNNING" => Ok(PluginState::Running),
            "SKIPPED" => Ok(PluginState::Skipped),
            other => Err(format!("unknown plugin state '{}'", other)),
        }
    }
}

/// Outcome for one processed object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportItem {
    pub id: String,
    pub job_id: String,
    pub source_object_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_object_type: Option<ObjectType>,
    pub plugin_state: PluginState,
    #[serde(default)]
    pub details: String,
    /// `details` holds HTML rather than plain text.
    #[serde(default)]
    pub html_details: bool,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl ReportItem {
    /// Starts a RUNNING item for an object.
    pub fn new(
        job_id: impl Into<String>,
        source_object_id: impl Into<String>,
        source_object_type: Option<ObjectType>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_id: job_id.into(),
            source_object_id: source_object_id.into(),
            source_object_type,
            plugin_state: PluginState::Running,
            details: String::new(),
            html_details: false,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Closes the item with a final outcome.
    pub fn finish(mut self, state: PluginState, details: impl Into<String>) -> Self {
        self.plugin_state = state;
        self.details = details.into();
        if self.ended_at.is_none() {
            self.ended_at = Some(Utc::now());
        }
        self
    }

    pub fn with_html_details(mut self, html: impl Into<String>) -> Self {
        self.details = html.into();
        self.html_details = true;
        self
    }
}

/// Structured outcome of one job, in processing order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub job_id: String,
    pub items: Vec<ReportItem>,
}

impl Report {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            items: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn count(&self, state: PluginState) -> usize {
        self.items
            .iter()
            .filter(|item| item.plugin_state == state)
            .count()
    }

    pub fn item_for(&self, object_id: &str) -> Option<&ReportItem> {
        self.items
            .iter()
            .find(|item| item.source_object_id == object_id)
    }
}
