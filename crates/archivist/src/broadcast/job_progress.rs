//! Live job progress for in-process subscribers (CLI, embedding services).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::JobState;
use crate::progress::ProgressCounters;

/// Snapshot of a job's counters, emitted after every merge and state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    pub job_id: String,
    /// State of the job when the event was taken.
    pub state: JobState,
    pub counters: ProgressCounters,
    pub completion_percentage: u8,
    /// Time since the job started running.
    pub elapsed_ms: u64,
    pub timestamp: DateTime<Utc>,
    /// Set on state changes, e.g. the failure reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl JobProgressEvent {
    pub fn new(job_id: &str, state: JobState, counters: ProgressCounters, elapsed_ms: u64) -> Self {
        Self {
            job_id: job_id.to_string(),
            state,
            counters,
            completion_percentage: counters.completion_percentage(),
            elapsed_ms,
            timestamp: Utc::now(),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Fan-out of [`JobProgressEvent`]s. Slow subscribers lag and lose events;
/// the store stays authoritative.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: JobProgressEvent) {
        // no subscribers is not an error
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters() -> ProgressCounters {
        ProgressCounters {
            total: 4,
            success: 1,
            failure: 1,
            remaining: 2,
        }
    }

    #[test]
    fn test_send_without_subscribers() {
        let broadcaster = JobProgressBroadcaster::new(10);
        broadcaster.send(JobProgressEvent::new("job", JobState::Running, counters(), 0));
    }

    #[test]
    fn test_subscriber_sees_terminal_event() {
        let broadcaster = JobProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();

        broadcaster.send(
            JobProgressEvent::new("job-7", JobState::Failed, counters(), 1500)
                .with_message("cancelled by request"),
        );

        let received = rx.try_recv().unwrap();
        assert_eq!(received.job_id, "job-7");
        assert_eq!(received.completion_percentage, 50);
        assert!(received.is_terminal());
        assert_eq!(received.message.as_deref(), Some("cancelled by request"));
    }

    #[test]
    fn test_event_serializes_camel_case() {
        let event = JobProgressEvent::new("j", JobState::Running, counters(), 10);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["jobId"], "j");
        assert_eq!(json["state"], "RUNNING");
        assert_eq!(json["completionPercentage"], 50);
        assert!(json.get("message").is_none());
    }

    #[test]
    fn test_subscriber_count() {
        let broadcaster = JobProgressBroadcaster::default();
        assert_eq!(broadcaster.subscriber_count(), 0);
        let rx = broadcaster.subscribe();
        assert_eq!(broadcaster.subscriber_count(), 1);
        drop(rx);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }
}
