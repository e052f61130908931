//! Job lifecycle coordination.
//!
//! [`JobOrchestrator::submit`] persists the job as CREATED and returns at
//! once; the run itself happens on a dedicated thread that resolves the
//! selection, feeds a [`crate::worker::WorkerPool`] and finalizes the job.

pub mod control;
mod run;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{info, warn};

use crate::broadcast::JobProgressBroadcaster;
use crate::config::EngineConfig;
use crate::error::OrchestratorError;
use crate::model::{Job, PluginType, Report, SelectedObjects};
use crate::notify::{JobNotifier, NoopNotifier};
use crate::plugin::PluginRegistry;
use crate::progress::ProgressAggregator;
use crate::retrieval::ObjectRetrieval;
use crate::selection::ObjectIndex;
use crate::store::JobStore;

use control::JobControl;
use run::JobRun;

/// Details of state set when a job is cancelled.
pub const CANCELLED_BY_REQUEST: &str = "cancelled by request";

/// What a client asks to run.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub name: String,
    pub plugin_id: String,
    pub plugin_type: PluginType,
    pub parameters: BTreeMap<String, String>,
    pub selection: SelectedObjects,
    pub username: String,
}

impl JobRequest {
    pub fn new(plugin_id: impl Into<String>, plugin_type: PluginType, selection: SelectedObjects) -> Self {
        let plugin_id = plugin_id.into();
        Self {
            name: plugin_id.clone(),
            plugin_id,
            plugin_type,
            parameters: BTreeMap::new(),
            selection,
            username: "system".to_string(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    fn into_job(self) -> Job {
        Job::new(
            self.name,
            self.plugin_id,
            self.plugin_type,
            self.parameters,
            self.selection,
            self.username,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Upper bound on concurrent workers per job.
    pub worker_count: usize,
    pub batch_size: usize,
    /// Minimum time between two progress snapshots reaching the store.
    pub persist_interval: Duration,
    pub index_page_size: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for OrchestratorSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            worker_count: config.worker_count.max(1),
            batch_size: config.batch_size.max(1),
            persist_interval: config.progress_persist_interval(),
            index_page_size: config.index_page_size.max(1),
        }
    }
}

/// Live handles of a job between submission and finalization.
struct RunningJob {
    control: Arc<JobControl>,
    aggregator: Option<Arc<ProgressAggregator>>,
}

#[derive(Default, Clone)]
struct RunningJobs(Arc<Mutex<HashMap<String, RunningJob>>>);

impl RunningJobs {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, RunningJob>> {
        self.0.lock().unwrap_or_else(|e| {
            warn!("running jobs lock poisoned, recovering");
            e.into_inner()
        })
    }

    fn register(&self, job_id: &str) -> Arc<JobControl> {
        let control = Arc::new(JobControl::new());
        self.lock().insert(
            job_id.to_string(),
            RunningJob {
                control: Arc::clone(&control),
                aggregator: None,
            },
        );
        control
    }

    /// Publishes the aggregator of a RUNNING job. A cancel that raced ahead
    /// of it is applied here.
    fn attach(&self, job_id: &str, aggregator: &Arc<ProgressAggregator>) {
        let mut running = self.lock();
        if let Some(entry) = running.get_mut(job_id) {
            entry.aggregator = Some(Arc::clone(aggregator));
            if entry.control.is_cancelled() {
                aggregator.mark_stopping();
            }
        }
    }

    fn remove(&self, job_id: &str) {
        self.lock().remove(job_id);
    }
}

/// Runs plugin jobs over archived objects.
///
/// Collaborators are injected at construction; the orchestrator owns no
/// global state.
pub struct JobOrchestrator {
    registry: Arc<PluginRegistry>,
    store: Arc<dyn JobStore>,
    index: Arc<dyn ObjectIndex>,
    retrieval: Arc<dyn ObjectRetrieval>,
    notifier: Arc<dyn JobNotifier>,
    broadcaster: Option<JobProgressBroadcaster>,
    settings: OrchestratorSettings,
    running: RunningJobs,
}

impl JobOrchestrator {
    pub fn new(
        registry: PluginRegistry,
        store: Arc<dyn JobStore>,
        index: Arc<dyn ObjectIndex>,
        retrieval: Arc<dyn ObjectRetrieval>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            store,
            index,
            retrieval,
            notifier: Arc::new(NoopNotifier),
            broadcaster: None,
            settings,
            running: RunningJobs::default(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn JobNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_broadcaster(mut self, broadcaster: JobProgressBroadcaster) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn settings(&self) -> OrchestratorSettings {
        self.settings
    }

    /// Creates the job and starts it in the background.
    ///
    /// The job is durable (state CREATED) before this returns.
    pub fn submit(&self, request: JobRequest) -> Result<JobHandle, OrchestratorError> {
        let job = self.create(request)?;
        let id = job.id.clone();
        let run = self.prepare(job.clone());

        let spawned = thread::Builder::new()
            .name(format!("archivist-job-{}", short_id(&id)))
            .spawn(move || run.execute());

        match spawned {
            Ok(handle) => Ok(JobHandle { id, handle }),
            Err(e) => {
                self.running.remove(&id);
                let mut job = job;
                let reason = format!("failed to start job thread: {}", e);
                if job.fail(reason.clone()).is_ok() {
                    self.store.update_job(&job)?;
                }
                Err(OrchestratorError::SpawnFailed(reason))
            }
        }
    }

    /// Creates the job and runs it on the calling thread.
    pub fn run(&self, request: JobRequest) -> Result<Job, OrchestratorError> {
        let job = self.create(request)?;
        self.prepare(job).execute()
    }

    fn create(&self, request: JobRequest) -> Result<Job, OrchestratorError> {
        let job = request.into_job();
        self.store.create_job(&job)?;
        info!(
            job_id = %job.id,
            plugin = %job.plugin_id,
            user = %job.username,
            "job created"
        );
        Ok(job)
    }

    fn prepare(&self, job: Job) -> JobRun {
        let control = self.running.register(&job.id);
        JobRun {
            job,
            registry: Arc::clone(&self.registry),
            store: Arc::clone(&self.store),
            index: Arc::clone(&self.index),
            retrieval: Arc::clone(&self.retrieval),
            notifier: Arc::clone(&self.notifier),
            broadcaster: self.broadcaster.clone(),
            settings: self.settings,
            control,
            running: self.running.clone(),
        }
    }

    /// Requests cooperative cancellation. Returns false when the job has
    /// already finished or a cancel is already pending.
    pub fn cancel(&self, job_id: &str) -> Result<bool, OrchestratorError> {
        {
            let running = self.running.lock();
            if let Some(entry) = running.get(job_id) {
                let first = entry.control.cancel();
                if first {
                    info!(job_id, "cancel requested");
                    if let Some(aggregator) = &entry.aggregator {
                        aggregator.mark_stopping();
                    }
                }
                return Ok(first);
            }
        }

        match self.store.get_job(job_id)? {
            Some(_) => Ok(false),
            None => Err(OrchestratorError::JobNotFound(job_id.to_string())),
        }
    }

    /// Latest view of a job: live counters while it runs, the stored
    /// record afterwards.
    pub fn job(&self, job_id: &str) -> Result<Job, OrchestratorError> {
        if let Some(aggregator) = self.live_aggregator(job_id) {
            return Ok(aggregator.job_snapshot());
        }
        self.store
            .get_job(job_id)?
            .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))
    }

    pub fn report(&self, job_id: &str) -> Result<Report, OrchestratorError> {
        if let Some(aggregator) = self.live_aggregator(job_id) {
            return Ok(aggregator.report_snapshot());
        }
        self.store
            .get_report(job_id)?
            .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))
    }

    /// Ids of jobs submitted and not yet finalized.
    pub fn running_jobs(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.running.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn live_aggregator(&self, job_id: &str) -> Option<Arc<ProgressAggregator>> {
        self.running
            .lock()
            .get(job_id)
            .and_then(|entry| entry.aggregator.clone())
    }
}

/// A background job run.
pub struct JobHandle {
    id: String,
    handle: JoinHandle<Result<Job, OrchestratorError>>,
}

impl JobHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the run and returns the terminal job.
    pub fn join(self) -> Result<Job, OrchestratorError> {
        self.handle
            .join()
            .map_err(|_| OrchestratorError::JobThreadPanicked(self.id.clone()))?
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
