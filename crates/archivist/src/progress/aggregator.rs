//! Thread-safe fold of worker outcomes into the job, its report and its
//! counters, with throttled persistence.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::broadcast::{JobProgressBroadcaster, JobProgressEvent};
use crate::model::{Job, JobState, JobStats, ObjectType, PluginState, Report, ReportItem};
use crate::orchestrator::control::JobControl;
use crate::store::{JobStore, StoreError};

/// Live counters of one job. `success + failure + remaining == total`
/// holds at every observation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressCounters {
    pub total: u64,
    pub success: u64,
    pub failure: u64,
    pub remaining: u64,
}

impl ProgressCounters {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            success: 0,
            failure: 0,
            remaining: total,
        }
    }

    pub fn processed(&self) -> u64 {
        self.success + self.failure
    }

    pub fn completion_percentage(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        (self.processed().min(self.total) * 100 / self.total) as u8
    }

    fn apply(&mut self, state: PluginState) {
        if self.remaining == 0 {
            // more outcomes than targeted objects; grow instead of breaking the sum
            self.total += 1;
        } else {
            self.remaining -= 1;
        }
        if state.is_failure() {
            self.failure += 1;
        } else {
            self.success += 1;
        }
    }

    fn stats(&self) -> JobStats {
        JobStats {
            total: self.total,
            success: self.success,
            failure: self.failure,
            remaining: self.remaining,
            completion_percentage: self.completion_percentage(),
        }
    }
}

struct Progress {
    job: Job,
    report: Report,
    counters: ProgressCounters,
    /// Bumped by every change that should reach the store.
    version: u64,
    last_persist: Instant,
    finalized: bool,
}

impl Progress {
    fn snapshot(&self) -> Snapshot {
        Snapshot {
            version: self.version,
            job: self.job.clone(),
            report: self.report.clone(),
        }
    }
}

/// A copy of job and report taken under the progress lock and written
/// after it is released.
struct Snapshot {
    version: u64,
    job: Job,
    report: Report,
}

/// The single owner of a running job's state.
///
/// Workers only reach the job through [`ProgressAggregator::merge`], which
/// applies a whole batch under one lock. Store writes happen outside that
/// lock; a snapshot older than the last one written is dropped.
pub struct ProgressAggregator {
    progress: Mutex<Progress>,
    persisted: Mutex<u64>,
    store: Arc<dyn JobStore>,
    broadcaster: Option<JobProgressBroadcaster>,
    persist_interval: Duration,
    control: Arc<JobControl>,
    started: Instant,
}

impl ProgressAggregator {
    /// `job` must already be persisted in `store`.
    pub fn new(
        mut job: Job,
        total: u64,
        store: Arc<dyn JobStore>,
        broadcaster: Option<JobProgressBroadcaster>,
        persist_interval: Duration,
        control: Arc<JobControl>,
    ) -> Self {
        let counters = ProgressCounters::new(total);
        job.stats = counters.stats();
        let report = Report::new(job.id.clone());

        Self {
            progress: Mutex::new(Progress {
                job,
                report,
                counters,
                version: 0,
                last_persist: Instant::now(),
                finalized: false,
            }),
            persisted: Mutex::new(0),
            store,
            broadcaster,
            persist_interval,
            control,
            started: Instant::now(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(|e| {
            warn!("progress lock poisoned, recovering");
            e.into_inner()
        })
    }

    /// Applies one batch of outcomes as a single step.
    pub fn merge(&self, items: Vec<ReportItem>) {
        if items.is_empty() {
            return;
        }

        let due = {
            let mut progress = self.lock();
            if progress.finalized {
                warn!(
                    job_id = %progress.job.id,
                    items = items.len(),
                    "ignoring outcomes merged after finalize"
                );
                return;
            }

            for item in &items {
                progress.counters.apply(item.plugin_state);
            }
            progress.report.items.extend(items);
            progress.job.stats = progress.counters.stats();
            progress.version += 1;
            self.publish(&progress, None);

            (progress.last_persist.elapsed() >= self.persist_interval).then(|| {
                progress.last_persist = Instant::now();
                progress.snapshot()
            })
        };

        if let Some(snapshot) = due {
            self.persist_progress(snapshot);
        }
    }

    /// Adds SKIPPED items for objects that will never be processed.
    pub fn record_skipped(&self, ids: &[String], object_type: Option<ObjectType>, reason: &str) {
        if ids.is_empty() {
            return;
        }
        let job_id = self.lock().job.id.clone();
        debug!(job_id = %job_id, count = ids.len(), reason, "skipping objects");
        let items = ids
            .iter()
            .map(|id| ReportItem::new(&job_id, id, object_type).finish(PluginState::Skipped, reason))
            .collect();
        self.merge(items);
    }

    /// Lowers the total when the selection yielded fewer ids than counted.
    pub fn settle_total(&self, produced: u64) {
        let mut progress = self.lock();
        let counters = progress.counters;
        if progress.finalized || produced >= counters.total {
            return;
        }
        let shortfall = (counters.total - produced).min(counters.remaining);
        warn!(
            job_id = %progress.job.id,
            counted = counters.total,
            produced,
            "selection shrank while running"
        );
        progress.counters.total -= shortfall;
        progress.counters.remaining -= shortfall;
        progress.job.stats = progress.counters.stats();
        progress.version += 1;
    }

    /// RUNNING -> STOPPING, persisted immediately.
    pub fn mark_stopping(&self) {
        let snapshot = {
            let mut progress = self.lock();
            if progress.job.state != JobState::Running {
                return;
            }
            if let Err(e) = progress.job.transition(JobState::Stopping) {
                warn!("{}", e);
                return;
            }
            info!(job_id = %progress.job.id, "job stopping");
            progress.version += 1;
            progress.last_persist = Instant::now();
            self.publish(&progress, Some("stop requested"));
            progress.snapshot()
        };
        self.persist_progress(snapshot);
    }

    pub fn snapshot(&self) -> ProgressCounters {
        self.lock().counters
    }

    pub fn job_snapshot(&self) -> Job {
        self.lock().job.clone()
    }

    pub fn report_snapshot(&self) -> Report {
        self.lock().report.clone()
    }

    /// COMPLETED only when every targeted object succeeded.
    fn terminal_state_of(progress: &Progress) -> JobState {
        let c = progress.counters;
        if progress.job.state == JobState::Running && c.failure == 0 && c.remaining == 0 {
            JobState::Completed
        } else {
            JobState::Failed
        }
    }

    /// Time since the aggregator was created, i.e. since the job started
    /// running.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Moves the job to its terminal state and persists job and report
    /// unconditionally. `reason` forces FAILED with that explanation.
    /// Later merges are ignored.
    pub fn finalize(&self, reason: Option<String>) -> Result<Job, StoreError> {
        let snapshot = {
            let mut progress = self.lock();
            if progress.finalized {
                return Ok(progress.job.clone());
            }

            let next = match reason {
                Some(_) => JobState::Failed,
                None => Self::terminal_state_of(&progress),
            };
            let c = progress.counters;
            let details = reason.or_else(|| match next {
                JobState::Failed if c.remaining > 0 => {
                    Some(format!("{} of {} objects were not processed", c.remaining, c.total))
                }
                JobState::Failed => Some(format!("{} of {} objects failed", c.failure, c.total)),
                _ => None,
            });

            if let Err(e) = progress.job.transition(next) {
                error!("{}", e);
            }
            if progress.job.state == JobState::Failed && progress.job.state_details.is_none() {
                progress.job.state_details = details;
            }
            progress.job.stats = c.stats();
            progress.finalized = true;
            progress.version += 1;

            info!(
                job_id = %progress.job.id,
                state = %progress.job.state,
                success = c.success,
                failure = c.failure,
                remaining = c.remaining,
                elapsed_ms = self.elapsed().as_millis() as u64,
                "job finished"
            );

            let message = progress.job.state_details.clone();
            self.publish(&progress, message.as_deref());
            progress.snapshot()
        };

        self.write(&snapshot)?;
        Ok(snapshot.job)
    }

    /// Writes a snapshot unless a newer one already reached the store.
    fn write(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let mut written = self
            .persisted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if snapshot.version <= *written {
            return Ok(());
        }
        self.store.update_job(&snapshot.job)?;
        self.store.save_report(&snapshot.report)?;
        *written = snapshot.version;
        Ok(())
    }

    fn persist_progress(&self, snapshot: Snapshot) {
        if let Err(e) = self.write(&snapshot) {
            error!(job_id = %snapshot.job.id, "failed to persist progress: {}", e);
            self.control.fail(format!("failed to persist progress: {}", e));
        }
    }

    fn publish(&self, progress: &Progress, message: Option<&str>) {
        let Some(broadcaster) = &self.broadcaster else {
            return;
        };
        let mut event = JobProgressEvent::new(
            &progress.job.id,
            progress.job.state,
            progress.counters,
            self.elapsed().as_millis() as u64,
        );
        if let Some(message) = message {
            event = event.with_message(message);
        }
        broadcaster.send(event);
    }
}
