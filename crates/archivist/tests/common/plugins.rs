//! A plugin driven by a script, for exercising the orchestrator.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use archivist::model::{ObjectType, PluginState, PluginType};
use archivist::plugin::{BatchReport, JobContext, Plugin, PluginCategory, PluginError};
use archivist::RetrievedObject;

/// Holds `execute` calls until opened.
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    cond: Condvar,
    waiting: AtomicUsize,
}

impl Gate {
    pub fn pass(&self) {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.cond.wait(open).unwrap();
        }
    }

    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.cond.notify_all();
    }

    /// Blocks until `n` callers reached the gate.
    pub fn wait_for(&self, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while self.waiting.load(Ordering::SeqCst) < n {
            assert!(Instant::now() < deadline, "timed out waiting at the gate");
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

/// Lifecycle counters shared by a plugin and all of its clones.
#[derive(Default)]
pub struct Tally {
    pub clones: AtomicUsize,
    pub inits: AtomicUsize,
    pub shutdowns: AtomicUsize,
    pub before_all: AtomicUsize,
    pub after_all: AtomicUsize,
    pub execute_calls: AtomicUsize,
    executed: Mutex<Vec<String>>,
    pub gate: Option<Gate>,
}

impl Tally {
    pub fn gated() -> Self {
        Self {
            gate: Some(Gate::default()),
            ..Self::default()
        }
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    /// Object ids handed to `execute`, in call order, retries included.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

/// What the plugin does wrong, and where.
#[derive(Clone, Default)]
pub struct Script {
    pub fail_on: HashSet<String>,
    pub panic_on: HashSet<String>,
    pub partial_on: HashSet<String>,
    pub fail_init: bool,
    pub fail_before_all: bool,
    pub fail_after_all: bool,
}

impl Script {
    pub fn fail_on(mut self, id: &str) -> Self {
        self.fail_on.insert(id.to_string());
        self
    }

    pub fn panic_on(mut self, id: &str) -> Self {
        self.panic_on.insert(id.to_string());
        self
    }

    pub fn partial_on(mut self, id: &str) -> Self {
        self.partial_on.insert(id.to_string());
        self
    }
}

#[derive(Clone)]
pub struct ScriptedPlugin {
    script: Script,
    tally: Arc<Tally>,
}

impl ScriptedPlugin {
    pub const ID: &'static str = "scripted";

    pub fn new(script: Script, tally: Arc<Tally>) -> Self {
        Self { script, tally }
    }
}

impl Plugin for ScriptedPlugin {
    fn id(&self) -> &str {
        Self::ID
    }

    fn name(&self) -> &str {
        "Scripted test plugin"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn plugin_type(&self) -> PluginType {
        PluginType::AipToAip
    }

    fn category(&self) -> PluginCategory {
        PluginCategory::Misc
    }

    fn object_type(&self) -> ObjectType {
        ObjectType::Aip
    }

    fn init(&mut self) -> Result<(), PluginError> {
        self.tally.inits.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_init {
            return Err(PluginError::Init("scripted init failure".to_string()));
        }
        Ok(())
    }

    fn before_all_execute(&mut self, _ctx: &JobContext) -> Result<(), PluginError> {
        self.tally.before_all.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_before_all {
            return Err(PluginError::Execution("scripted before-all failure".to_string()));
        }
        Ok(())
    }

    fn execute(
        &mut self,
        _ctx: &JobContext,
        objects: &[RetrievedObject],
        report: &mut BatchReport,
    ) -> Result<PluginState, PluginError> {
        self.tally.execute_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.tally.gate {
            gate.pass();
        }

        for object in objects {
            let id = object.id();
            self.tally.executed.lock().unwrap().push(id.to_string());
            if self.script.panic_on.contains(id) {
                panic!("scripted panic on {}", id);
            }
            if self.script.fail_on.contains(id) {
                return Err(PluginError::Execution(format!("scripted failure on {}", id)));
            }
            if self.script.partial_on.contains(id) {
                report.record(id, PluginState::PartialSuccess, "partially done");
            } else {
                report.record(id, PluginState::Success, "done");
            }
        }
        Ok(report.aggregate_state())
    }

    fn after_all_execute(&mut self, _ctx: &JobContext) -> Result<(), PluginError> {
        self.tally.after_all.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_after_all {
            return Err(PluginError::Execution("scripted after-all failure".to_string()));
        }
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), PluginError> {
        self.tally.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn clone_me(&self) -> Box<dyn Plugin> {
        self.tally.clones.fetch_add(1, Ordering::SeqCst);
        Box::new(self.clone())
    }
}
