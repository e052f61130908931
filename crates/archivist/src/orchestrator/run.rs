use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error, info, info_span, warn};

use super::control::JobControl;
use super::{OrchestratorSettings, RunningJobs, CANCELLED_BY_REQUEST};
use crate::broadcast::{JobProgressBroadcaster, JobProgressEvent};
use crate::error::OrchestratorError;
use crate::model::{Job, JobState, Report};
use crate::notify::JobNotifier;
use crate::plugin::{JobContext, Plugin, PluginRegistry};
use crate::progress::{ProgressAggregator, ProgressCounters};
use crate::retrieval::ObjectRetrieval;
use crate::selection::{ObjectIndex, ResolvedSelection, SelectionResolver};
use crate::store::JobStore;
use crate::worker::batch::panic_message;
use crate::worker::{guarded, Batch, WorkerPool};

/// Everything one job run needs, detached from the orchestrator.
pub(super) struct JobRun {
    pub(super) job: Job,
    pub(super) registry: Arc<PluginRegistry>,
    pub(super) store: Arc<dyn JobStore>,
    pub(super) index: Arc<dyn ObjectIndex>,
    pub(super) retrieval: Arc<dyn ObjectRetrieval>,
    pub(super) notifier: Arc<dyn JobNotifier>,
    pub(super) broadcaster: Option<JobProgressBroadcaster>,
    pub(super) settings: OrchestratorSettings,
    pub(super) control: Arc<JobControl>,
    pub(super) running: RunningJobs,
}

/// Drops the job from the running set however the run ends.
struct Deregister<'a> {
    running: &'a RunningJobs,
    job_id: &'a str,
}

impl Drop for Deregister<'_> {
    fn drop(&mut self) {
        self.running.remove(self.job_id);
    }
}

/// How the id stream ended.
struct Feed {
    produced: u64,
    exhausted: bool,
    leftover: Vec<String>,
}

impl JobRun {
    pub(super) fn execute(self) -> Result<Job, OrchestratorError> {
        let span = info_span!("job", job_id = %self.job.id, plugin = %self.job.plugin_id);
        let _enter = span.enter();

        let result = {
            let _deregister = Deregister {
                running: &self.running,
                job_id: &self.job.id,
            };
            self.drive()
        };

        match &result {
            Ok(job) => self.notify(job),
            Err(e) => error!("job run aborted: {}", e),
        }
        result
    }

    fn notify(&self, job: &Job) {
        match panic::catch_unwind(AssertUnwindSafe(|| self.notifier.job_finished(job))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("job notification failed: {}", e),
            Err(payload) => error!(
                "job notifier panicked: {}",
                panic_message(payload.as_ref())
            ),
        }
    }

    fn drive(&self) -> Result<Job, OrchestratorError> {
        let mut job = self.job.clone();

        let mut hooks = match self.configure(&job) {
            Ok(plugin) => plugin,
            Err(reason) => return self.fail_before_start(job, reason),
        };
        if self.control.is_cancelled() {
            return self.fail_before_start(job, CANCELLED_BY_REQUEST.to_string());
        }

        let resolver = SelectionResolver::new(Arc::clone(&self.index), self.settings.index_page_size);
        let (selection, resolve_error) = match resolver.resolve(&job.selection) {
            Ok(selection) => (Some(selection), None),
            Err(e) if e.is_configuration() => {
                return self.fail_before_start(job, format!("invalid selection: {}", e));
            }
            // an unavailable index fails the job after it started
            Err(e) => (None, Some(format!("selection could not be resolved: {}", e))),
        };

        if let Err(e) = job.transition(JobState::Running) {
            return self.fail_before_start(job, e.to_string());
        }
        self.store.update_job(&job)?;
        self.store.save_report(&Report::new(job.id.clone()))?;
        info!("job running");
        let total = selection.as_ref().map_or(0, ResolvedSelection::total);

        let ctx = Arc::new(JobContext {
            job_id: job.id.clone(),
            job_name: job.name.clone(),
            username: job.username.clone(),
            parameters: job.plugin_parameters.clone(),
        });
        let aggregator = Arc::new(ProgressAggregator::new(
            job,
            total,
            Arc::clone(&self.store),
            self.broadcaster.clone(),
            self.settings.persist_interval,
            Arc::clone(&self.control),
        ));
        self.running.attach(&self.job.id, &aggregator);

        let Some(mut selection) = selection else {
            if let Some(reason) = resolve_error {
                error!("{}", reason);
                self.control.fail(reason);
            }
            return Ok(aggregator.finalize(self.stop_reason())?);
        };

        if total == 0 {
            debug!("selection is empty");
            return Ok(aggregator.finalize(self.stop_reason())?);
        }

        if let Err(e) = guarded(|| hooks.before_all_execute(&ctx)) {
            let reason = format!("before-all hook failed: {}", e);
            error!("{}", reason);
            self.control.fail(reason);
            self.skip_rest(&aggregator, &mut selection, Vec::new(), 0);
            return Ok(aggregator.finalize(self.stop_reason())?);
        }

        let feed = self.process(hooks.as_ref(), &ctx, &aggregator, &mut selection, total);

        if self.control.failure().is_some() {
            self.skip_rest(&aggregator, &mut selection, feed.leftover, feed.produced);
        } else if feed.exhausted {
            aggregator.settle_total(feed.produced);
        }

        if let Err(e) = guarded(|| hooks.after_all_execute(&ctx)) {
            let reason = format!("after-all hook failed: {}", e);
            error!("{}", reason);
            self.control.fail(reason);
        }

        Ok(aggregator.finalize(self.stop_reason())?)
    }

    /// Configuration checks; any failure keeps the job from starting.
    fn configure(&self, job: &Job) -> Result<Box<dyn Plugin>, String> {
        let plugin = self
            .registry
            .instantiate(&job.plugin_id, &job.plugin_parameters)
            .map_err(|e| e.to_string())?;

        if plugin.plugin_type() != job.plugin_type {
            return Err(format!(
                "plugin '{}' is of type {}, job requested {}",
                job.plugin_id,
                plugin.plugin_type(),
                job.plugin_type
            ));
        }

        if let Some(object_type) = job.selection.object_type() {
            if !job.plugin_type.accepts(object_type) {
                return Err(format!(
                    "{} plugins cannot operate on {} objects",
                    job.plugin_type, object_type
                ));
            }
            if plugin.object_type() != object_type {
                return Err(format!(
                    "plugin '{}' operates on {} objects, selection targets {}",
                    job.plugin_id,
                    plugin.object_type(),
                    object_type
                ));
            }
        }

        SelectionResolver::validate(&job.selection).map_err(|e| e.to_string())?;
        Ok(plugin)
    }

    /// CREATED -> FAILED with an empty report.
    fn fail_before_start(&self, mut job: Job, reason: String) -> Result<Job, OrchestratorError> {
        warn!(reason = %reason, "job rejected before start");
        if let Err(e) = job.fail(reason.clone()) {
            error!("{}", e);
        }
        self.store.update_job(&job)?;
        self.store.save_report(&Report::new(job.id.clone()))?;

        if let Some(broadcaster) = &self.broadcaster {
            broadcaster.send(
                JobProgressEvent::new(&job.id, job.state, ProgressCounters::default(), 0)
                    .with_message(reason),
            );
        }
        Ok(job)
    }

    /// Feeds batches to a worker pool until the selection ends or the job
    /// stops, then drains the pool.
    fn process(
        &self,
        prototype: &dyn Plugin,
        ctx: &Arc<JobContext>,
        aggregator: &Arc<ProgressAggregator>,
        selection: &mut ResolvedSelection,
        total: u64,
    ) -> Feed {
        let batch_size = self.settings.batch_size.max(1);
        let batches = total.div_ceil(batch_size as u64) as usize;
        let worker_count = self.settings.worker_count.min(batches).max(1);
        let plugins: Vec<Box<dyn Plugin>> = (0..worker_count).map(|_| prototype.clone_me()).collect();

        let mut feed = Feed {
            produced: 0,
            exhausted: false,
            leftover: Vec::new(),
        };

        let mut pool = match WorkerPool::start(
            plugins,
            Arc::clone(ctx),
            Arc::clone(&self.retrieval),
            Arc::clone(aggregator),
            Arc::clone(&self.control),
        ) {
            Ok(pool) => pool,
            Err(e) => {
                self.control.fail(format!("worker pool failed to start: {}", e));
                return feed;
            }
        };

        let mut sequence = 0;
        loop {
            let mut ids = Vec::with_capacity(batch_size);
            let mut selection_failed = false;
            while ids.len() < batch_size {
                match selection.next() {
                    Some(Ok(id)) => ids.push(id),
                    Some(Err(e)) => {
                        let reason = format!("selection failed while running: {}", e);
                        error!("{}", reason);
                        self.control.fail(reason);
                        selection_failed = true;
                        break;
                    }
                    None => {
                        feed.exhausted = true;
                        break;
                    }
                }
            }
            feed.produced += ids.len() as u64;

            if selection_failed {
                feed.leftover = ids;
                break;
            }
            if ids.is_empty() {
                break;
            }

            let batch = Batch::new(sequence, ids);
            sequence += 1;
            if let Err(e) = pool.dispatch(batch) {
                debug!("{}", e);
                if !self.control.should_stop() {
                    self.control.fail("all workers exited early");
                }
                feed.leftover = e.into_batch().object_ids;
                break;
            }
            if feed.exhausted {
                break;
            }
        }

        let panicked = pool.join();
        if panicked > 0 {
            self.control.fail(format!("{} workers panicked", panicked));
        }
        debug!(batches = sequence, produced = feed.produced, "dispatch finished");
        feed
    }

    /// Records SKIPPED items for every id that will not run, including
    /// the rest of the selection.
    fn skip_rest(
        &self,
        aggregator: &ProgressAggregator,
        selection: &mut ResolvedSelection,
        leftover: Vec<String>,
        produced: u64,
    ) {
        let reason = format!(
            "not processed: {}",
            self.control.failure().unwrap_or_default()
        );
        let object_type = selection.object_type();
        aggregator.record_skipped(&leftover, object_type, &reason);

        let chunk_size = self.settings.batch_size.max(1);
        let mut produced = produced;
        let mut chunk = Vec::with_capacity(chunk_size);
        let mut exhausted = true;
        for next in selection.by_ref() {
            match next {
                Ok(id) => {
                    produced += 1;
                    chunk.push(id);
                    if chunk.len() == chunk_size {
                        aggregator.record_skipped(&chunk, object_type, &reason);
                        chunk.clear();
                    }
                }
                Err(e) => {
                    warn!("selection failed while skipping: {}", e);
                    exhausted = false;
                    break;
                }
            }
        }
        aggregator.record_skipped(&chunk, object_type, &reason);
        if exhausted {
            aggregator.settle_total(produced);
        }
    }

    fn stop_reason(&self) -> Option<String> {
        self.control.failure().or_else(|| {
            self.control
                .is_cancelled()
                .then(|| CANCELLED_BY_REQUEST.to_string())
        })
    }
}
