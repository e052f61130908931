//! Test harness wiring a catalog, a recording store and an orchestrator.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use archivist::model::{Aip, ArchivedObject, Job, JobState, Report};
use archivist::store::{JobStore, MemoryJobStore, StoreError};
use archivist::{JobOrchestrator, MemoryCatalog, OrchestratorSettings, PluginRegistry};

use super::plugins::{Tally, Script, ScriptedPlugin};

/// Settings that persist every merge and page the index in small steps.
pub fn settings(worker_count: usize, batch_size: usize) -> OrchestratorSettings {
    OrchestratorSettings {
        worker_count,
        batch_size,
        persist_interval: Duration::ZERO,
        index_page_size: 2,
    }
}

/// Memory store that checks `success + failure + remaining == total` on
/// every job write and keeps the sequence of persisted states.
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryJobStore,
    states: Mutex<Vec<JobState>>,
    violations: Mutex<Vec<String>>,
}

impl RecordingStore {
    pub fn states(&self) -> Vec<JobState> {
        self.states.lock().unwrap().clone()
    }

    pub fn violations(&self) -> Vec<String> {
        self.violations.lock().unwrap().clone()
    }

    fn observe(&self, job: &Job) {
        self.states.lock().unwrap().push(job.state);
        let s = job.stats;
        if s.success + s.failure + s.remaining != s.total {
            self.violations.lock().unwrap().push(format!(
                "{}: {} + {} + {} != {}",
                job.state, s.success, s.failure, s.remaining, s.total
            ));
        }
    }
}

impl JobStore for RecordingStore {
    fn create_job(&self, job: &Job) -> Result<(), StoreError> {
        self.observe(job);
        self.inner.create_job(job)
    }

    fn update_job(&self, job: &Job) -> Result<(), StoreError> {
        self.observe(job);
        self.inner.update_job(job)
    }

    fn get_job(&self, id: &str) -> Result<Option<Job>, StoreError> {
        self.inner.get_job(id)
    }

    fn save_report(&self, report: &Report) -> Result<(), StoreError> {
        self.inner.save_report(report)
    }

    fn get_report(&self, job_id: &str) -> Result<Option<Report>, StoreError> {
        self.inner.get_report(job_id)
    }
}

pub fn aip(id: &str) -> ArchivedObject {
    ArchivedObject::Aip(Aip {
        id: id.to_string(),
        parent_id: None,
        title: Some(format!("Collection {}", id)),
        properties: BTreeMap::new(),
    })
}

pub struct TestHarness {
    pub catalog: Arc<MemoryCatalog>,
    pub store: Arc<RecordingStore>,
    pub tally: Arc<Tally>,
}

impl TestHarness {
    /// A catalog holding `aip-1` ..= `aip-{count}`.
    pub fn with_aips(count: usize) -> Self {
        Self::with_tally(count, Tally::default())
    }

    pub fn with_tally(count: usize, tally: Tally) -> Self {
        let catalog = MemoryCatalog::new();
        for i in 1..=count {
            catalog.insert(aip(&format!("aip-{}", i)));
        }
        Self {
            catalog: Arc::new(catalog),
            store: Arc::new(RecordingStore::default()),
            tally: Arc::new(tally),
        }
    }

    pub fn ids(&self, count: usize) -> Vec<String> {
        (1..=count).map(|i| format!("aip-{}", i)).collect()
    }

    pub fn plugin(&self, script: Script) -> ScriptedPlugin {
        ScriptedPlugin::new(script, Arc::clone(&self.tally))
    }

    pub fn orchestrator(&self, script: Script, settings: OrchestratorSettings) -> JobOrchestrator {
        let mut registry = PluginRegistry::new();
        registry.register(Box::new(self.plugin(script)));
        self.orchestrator_with(registry, settings)
    }

    pub fn orchestrator_with(
        &self,
        registry: PluginRegistry,
        settings: OrchestratorSettings,
    ) -> JobOrchestrator {
        JobOrchestrator::new(
            registry,
            self.store.clone(),
            self.catalog.clone(),
            self.catalog.clone(),
            settings,
        )
    }

    pub fn stored_report(&self, job_id: &str) -> Report {
        self.store.get_report(job_id).unwrap().unwrap()
    }

    /// Every persisted snapshot kept the counter invariant.
    pub fn assert_consistent(&self) {
        assert_eq!(self.store.violations(), Vec::<String>::new());
    }
}
