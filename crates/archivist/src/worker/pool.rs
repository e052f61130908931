use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn, Span};

use crate::error::WorkerError;
use crate::model::{PluginState, ReportItem};
use crate::orchestrator::control::JobControl;
use crate::plugin::{JobContext, Plugin};
use crate::progress::ProgressAggregator;
use crate::retrieval::ObjectRetrieval;
use crate::worker::batch::{guarded, process_batch, Batch};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A batch the pool did not accept.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("job is stopping, batch {} not dispatched", .0.sequence)]
    Stopped(Batch),

    #[error("all workers exited, batch {} not dispatched", .0.sequence)]
    Disconnected(Batch),
}

impl DispatchError {
    pub fn into_batch(self) -> Batch {
        match self {
            DispatchError::Stopped(batch) | DispatchError::Disconnected(batch) => batch,
        }
    }
}

/// Fixed set of worker threads, one plugin instance each.
///
/// Batches are handed over a rendezvous channel, so a batch is only taken
/// off the dispatcher when a worker is free to run it.
pub struct WorkerPool {
    batch_sender: Option<Sender<Batch>>,
    workers: Vec<JoinHandle<()>>,
    control: Arc<JobControl>,
}

impl WorkerPool {
    pub fn start(
        plugins: Vec<Box<dyn Plugin>>,
        ctx: Arc<JobContext>,
        retrieval: Arc<dyn ObjectRetrieval>,
        aggregator: Arc<ProgressAggregator>,
        control: Arc<JobControl>,
    ) -> Result<Self, WorkerError> {
        if plugins.is_empty() {
            return Err(WorkerError::NoWorkers);
        }

        let (batch_sender, batch_receiver) = bounded::<Batch>(0);
        let worker_count = plugins.len();
        let mut pool = Self {
            batch_sender: Some(batch_sender),
            workers: Vec::with_capacity(worker_count),
            control: Arc::clone(&control),
        };

        for (worker_id, plugin) in plugins.into_iter().enumerate() {
            let worker = Worker {
                id: worker_id,
                plugin,
                receiver: batch_receiver.clone(),
                ctx: Arc::clone(&ctx),
                retrieval: Arc::clone(&retrieval),
                aggregator: Arc::clone(&aggregator),
                control: Arc::clone(&control),
            };
            let parent = Span::current();

            let spawned = thread::Builder::new()
                .name(format!("archivist-worker-{}", worker_id))
                .spawn(move || {
                    let _job = parent.entered();
                    let _span = info_span!("worker", worker_id).entered();
                    worker.run();
                });

            match spawned {
                Ok(handle) => pool.workers.push(handle),
                Err(e) => {
                    error!("Failed to spawn worker {}: {}", worker_id, e);
                    pool.join();
                    return Err(WorkerError::SpawnFailed(e.to_string()));
                }
            }
        }

        info!("Started {} workers", worker_count);
        Ok(pool)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Blocks until a worker takes the batch or the job starts stopping.
    pub fn dispatch(&self, mut batch: Batch) -> Result<(), DispatchError> {
        let Some(sender) = &self.batch_sender else {
            return Err(DispatchError::Disconnected(batch));
        };

        loop {
            if self.control.should_stop() {
                return Err(DispatchError::Stopped(batch));
            }
            match sender.send_timeout(batch, POLL_INTERVAL) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(returned)) => batch = returned,
                Err(SendTimeoutError::Disconnected(returned)) => {
                    return Err(DispatchError::Disconnected(returned))
                }
            }
        }
    }

    /// Closes the batch channel and waits for every worker to finish its
    /// current batch and shut its plugin down. Returns how many panicked.
    pub fn join(&mut self) -> usize {
        drop(self.batch_sender.take());

        let mut panicked = 0;
        for (i, worker) in self.workers.drain(..).enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
                panicked += 1;
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
        panicked
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.join();
        }
    }
}

struct Worker {
    id: usize,
    plugin: Box<dyn Plugin>,
    receiver: Receiver<Batch>,
    ctx: Arc<JobContext>,
    retrieval: Arc<dyn ObjectRetrieval>,
    aggregator: Arc<ProgressAggregator>,
    control: Arc<JobControl>,
}

impl Worker {
    fn run(mut self) {
        debug!("Worker {} started", self.id);
        let mut initialized = false;

        loop {
            match self.receiver.recv_timeout(POLL_INTERVAL) {
                Ok(batch) => {
                    // a handed-over batch runs even after a cancel
                    if let Some(reason) = self.control.failure() {
                        self.skip(batch, &reason);
                        continue;
                    }

                    if !initialized {
                        if let Err(e) = guarded(|| self.plugin.init()) {
                            let reason = format!("plugin init failed: {}", e);
                            error!(batch = batch.sequence, "{}", reason);
                            self.aggregator.merge(self.failed_items(&batch, &reason));
                            self.control.fail(reason);
                            break;
                        }
                        initialized = true;
                    }

                    debug!(
                        batch = batch.sequence,
                        objects = batch.len(),
                        "Worker {} processing batch",
                        self.id
                    );
                    let items =
                        process_batch(self.plugin.as_mut(), &self.ctx, self.retrieval.as_ref(), &batch);
                    self.aggregator.merge(items);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("Worker {} batch channel disconnected", self.id);
                    break;
                }
            }
        }

        if initialized {
            if let Err(e) = guarded(|| self.plugin.shutdown()) {
                warn!("Worker {} plugin shutdown failed: {}", self.id, e);
            }
        }
        debug!("Worker {} stopped", self.id);
    }

    /// A batch taken after the job failed: its objects are skipped.
    fn skip(&self, batch: Batch, reason: &str) {
        debug!(batch = batch.sequence, "Worker {} skipping batch", self.id);
        self.aggregator.record_skipped(
            &batch.object_ids,
            None,
            &format!("not processed: {}", reason),
        );
    }

    fn failed_items(&self, batch: &Batch, reason: &str) -> Vec<ReportItem> {
        batch
            .object_ids
            .iter()
            .map(|id| ReportItem::new(&self.ctx.job_id, id, None).finish(PluginState::Failure, reason))
            .collect()
    }
}
