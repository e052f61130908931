//! Job entity and its lifecycle.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::object::ObjectType;
use crate::selection::Filter;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Created,
    Running,
    Stopping,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Created => "CREATED",
            JobState::Running => "RUNNING",
            JobState::Stopping => "STOPPING",
            JobState::Completed => "COMPLETED",
            JobState::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Created, JobState::Running)
                | (JobState::Created, JobState::Failed)
                | (JobState::Running, JobState::Stopping)
                | (JobState::Running, JobState::Completed)
                | (JobState::Running, JobState::Failed)
                | (JobState::Stopping, JobState::Failed)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CREATED" => Ok(JobState::Created),
            "RUNNING" => Ok(JobState::Running),
            "STOPPING" => Ok(JobState::Stopping),
            "COMPLETED" => Ok(JobState::Completed),
            "FAILED" => Ok(JobState::Failed),
            other => Err(format!("unknown job state '{}'", other)),
        }
    }
}

/// Rejected state change.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Invalid job state transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: JobState,
    pub to: JobState,
}

/// Category of a plugin; constrains which object types it may target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginType {
    /// Ingest pipeline stage, works on transferred resources.
    Ingest,
    /// One-to-one action over archived content.
    AipToAip,
    Misc,
    Internal,
}

impl PluginType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginType::Ingest => "ingest",
            PluginType::AipToAip => "aip_to_aip",
            PluginType::Misc => "misc",
            PluginType::Internal => "internal",
        }
    }

    pub fn accepts(&self, object_type: ObjectType) -> bool {
        match self {
            PluginType::Ingest => object_type == ObjectType::TransferredResource,
            PluginType::AipToAip => matches!(
                object_type,
                ObjectType::Aip | ObjectType::Representation | ObjectType::File
            ),
            PluginType::Misc | PluginType::Internal => true,
        }
    }
}

impl fmt::Display for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PluginType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "ingest" => Ok(PluginType::Ingest),
            "aip_to_aip" => Ok(PluginType::AipToAip),
            "misc" => Ok(PluginType::Misc),
            "internal" => Ok(PluginType::Internal),
            other => Err(format!("unknown plugin type '{}'", other)),
        }
    }
}

/// Which objects a job operates on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SelectedObjects {
    /// Explicit, ordered identifiers.
    List { ids: Vec<String> },
    /// Every object of `object_type` matching a saved filter.
    Filter {
        filter: Filter,
        object_type: ObjectType,
    },
}

impl SelectedObjects {
    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SelectedObjects::List {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn filter(filter: Filter, object_type: ObjectType) -> Self {
        SelectedObjects::Filter {
            filter,
            object_type,
        }
    }

    /// Object type known up front, if any.
    pub fn object_type(&self) -> Option<ObjectType> {
        match self {
            SelectedObjects::List { .. } => None,
            SelectedObjects::Filter { object_type, .. } => Some(*object_type),
        }
    }
}

/// Persisted progress snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobStats {
    pub total: u64,
    pub success: u64,
    pub failure: u64,
    pub remaining: u64,
    pub completion_percentage: u8,
}

/// A submitted request to run one plugin over a selection of objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub plugin_id: String,
    pub plugin_type: PluginType,
    #[serde(default)]
    pub plugin_parameters: BTreeMap<String, String>,
    pub selection: SelectedObjects,
    pub username: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_details: Option<String>,
    #[serde(default)]
    pub stats: JobStats,
}

impl Job {
    pub fn new(
        name: impl Into<String>,
        plugin_id: impl Into<String>,
        plugin_type: PluginType,
        plugin_parameters: BTreeMap<String, String>,
        selection: SelectedObjects,
        username: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            plugin_id: plugin_id.into(),
            plugin_type,
            plugin_parameters,
            selection,
            username: username.into(),
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            state: JobState::Created,
            state_details: None,
            stats: JobStats::default(),
        }
    }

    /// Moves the job to `next`, stamping start/end times on the
    /// transitions that own them.
    pub fn transition(&mut self, next: JobState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }

        let now = Utc::now();
        if self.state == JobState::Created && next == JobState::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.ended_at = Some(now);
        }
        self.state = next;
        Ok(())
    }

    /// Marks the job failed with an explanation, from whichever
    /// non-terminal state it is in.
    pub fn fail(&mut self, details: impl Into<String>) -> Result<(), InvalidTransition> {
        self.transition(JobState::Failed)?;
        self.state_details = Some(details.into());
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(
            "nightly fixity",
            "fixity-check",
            PluginType::AipToAip,
            BTreeMap::new(),
            SelectedObjects::ids(["a", "b"]),
            "admin",
        )
    }

    #[test]
    fn test_new_job_is_created() {
        let job = job();
        assert_eq!(job.state, JobState::Created);
        assert!(!job.id.is_empty());
        assert!(job.started_at.is_none());
        assert!(job.ended_at.is_none());
    }

    #[test]
    fn test_start_sets_started_at_only() {
        let mut job = job();
        job.transition(JobState::Running).unwrap();
        assert!(job.started_at.is_some());
        assert!(job.ended_at.is_none());
    }

    #[test]
    fn test_terminal_sets_ended_at() {
        let mut job = job();
        job.transition(JobState::Running).unwrap();
        job.transition(JobState::Completed).unwrap();
        assert!(job.ended_at.is_some());
        assert!(job.is_finished());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut job = job();
        job.transition(JobState::Running).unwrap();
        job.transition(JobState::Completed).unwrap();

        let err = job.transition(JobState::Running).unwrap_err();
        assert_eq!(err.from, JobState::Completed);
        assert_eq!(err.to, JobState::Running);
        assert!(job.transition(JobState::Failed).is_err());
    }

    #[test]
    fn test_stopping_only_leads_to_failed() {
        let mut job = job();
        job.transition(JobState::Running).unwrap();
        job.transition(JobState::Stopping).unwrap();
        assert!(job.transition(JobState::Completed).is_err());
        assert!(job.transition(JobState::Running).is_err());
        job.transition(JobState::Failed).unwrap();
    }

    #[test]
    fn test_configuration_failure_skips_running() {
        let mut job = job();
        job.fail("unknown plugin").unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert!(job.started_at.is_none());
        assert!(job.ended_at.is_some());
        assert_eq!(job.state_details.as_deref(), Some("unknown plugin"));
    }

    #[test]
    fn test_plugin_type_accepts() {
        assert!(PluginType::Ingest.accepts(ObjectType::TransferredResource));
        assert!(!PluginType::Ingest.accepts(ObjectType::File));
        assert!(PluginType::AipToAip.accepts(ObjectType::File));
        assert!(!PluginType::AipToAip.accepts(ObjectType::TransferredResource));
        assert!(PluginType::Misc.accepts(ObjectType::TransferredResource));
    }

    #[test]
    fn test_state_parse() {
        assert_eq!("completed".parse::<JobState>().unwrap(), JobState::Completed);
        assert_eq!(
            "aip-to-aip".parse::<PluginType>().unwrap(),
            PluginType::AipToAip
        );
        assert!("paused".parse::<JobState>().is_err());
    }
}
