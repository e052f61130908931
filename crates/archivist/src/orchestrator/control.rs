//! Stop signals shared between a job run and its workers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing::warn;

/// Cooperative stop flags for one job.
///
/// Two reasons stop a run: a cancel request from outside, or the first
/// unrecoverable failure reported from inside. Only the first failure
/// reason is kept.
#[derive(Debug, Default)]
pub struct JobControl {
    cancelled: AtomicBool,
    failure: Mutex<Option<String>>,
}

impl JobControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Returns false if it was already requested.
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Records an unrecoverable failure; later reasons are dropped.
    pub fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let mut failure = self.failure.lock().unwrap_or_else(|e| e.into_inner());
        match failure.as_ref() {
            Some(first) => warn!(first = %first, dropped = %reason, "job already failing"),
            None => *failure = Some(reason),
        }
    }

    pub fn failure(&self) -> Option<String> {
        self.failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// No new work should start.
    pub fn should_stop(&self) -> bool {
        self.is_cancelled() || self.failure().is_some()
    }
}
