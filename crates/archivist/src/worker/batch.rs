//! The per-batch failure boundary around `Plugin::execute`.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, warn};

use crate::model::{PluginState, ReportItem};
use crate::plugin::{BatchReport, JobContext, Plugin, PluginError};
use crate::retrieval::{ObjectRetrieval, RetrievalError, RetrievedObject};

/// A bounded group of object ids handed to one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub sequence: u64,
    pub object_ids: Vec<String>,
}

impl Batch {
    pub fn new(sequence: u64, object_ids: Vec<String>) -> Self {
        Self {
            sequence,
            object_ids,
        }
    }

    pub fn len(&self) -> usize {
        self.object_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.object_ids.is_empty()
    }
}

/// Text of a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs `f` and turns a panic into [`PluginError::Panicked`].
pub fn guarded<T>(f: impl FnOnce() -> Result<T, PluginError>) -> Result<T, PluginError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(PluginError::Panicked(panic_message(payload.as_ref()))),
    }
}

/// Executes one batch and returns exactly one final item per object id,
/// in batch order.
///
/// Retrieval, type and plugin failures never escape: they become
/// SKIPPED or FAILURE items. The plugin must already be initialised.
pub fn process_batch(
    plugin: &mut dyn Plugin,
    ctx: &JobContext,
    retrieval: &dyn ObjectRetrieval,
    batch: &Batch,
) -> Vec<ReportItem> {
    let mut outcomes: Vec<Option<ReportItem>> = vec![None; batch.len()];
    let mut positions = Vec::with_capacity(batch.len());
    let mut objects = Vec::with_capacity(batch.len());

    for (pos, id) in batch.object_ids.iter().enumerate() {
        match retrieval.retrieve(id) {
            Ok(object) => {
                positions.push(pos);
                objects.push(object);
            }
            Err(RetrievalError::NotFound(_)) => {
                debug!(object = %id, "object vanished before processing");
                outcomes[pos] = Some(
                    ReportItem::new(&ctx.job_id, id, None)
                        .finish(PluginState::Skipped, "object no longer exists"),
                );
            }
            Err(e) => {
                outcomes[pos] = Some(
                    ReportItem::new(&ctx.job_id, id, None)
                        .finish(PluginState::Failure, format!("could not retrieve object: {}", e)),
                );
            }
        }
    }

    let expected = plugin.object_type();
    if let Some(stray) = objects.iter().find(|o| o.object.object_type() != expected) {
        let details = format!(
            "batch contains {} '{}' but plugin '{}' works on {}",
            stray.object.object_type(),
            stray.id(),
            plugin.id(),
            expected
        );
        warn!(batch = batch.sequence, %details, "rejecting batch");
        for (pos, object) in positions.iter().zip(&objects) {
            outcomes[*pos] = Some(failure_item(ctx, object, &details));
        }
        return outcomes.into_iter().flatten().collect();
    }

    if !objects.is_empty() {
        for (pos, item) in positions.into_iter().zip(execute_isolated(plugin, ctx, &objects, batch.sequence)) {
            outcomes[pos] = Some(item);
        }
    }

    outcomes.into_iter().flatten().collect()
}

/// One final item per object. When the batch call fails, outcomes the
/// plugin recorded are kept and the rest are retried one object at a time.
fn execute_isolated(
    plugin: &mut dyn Plugin,
    ctx: &JobContext,
    objects: &[RetrievedObject],
    sequence: u64,
) -> Vec<ReportItem> {
    let (report, result) = execute_guarded(plugin, ctx, objects);
    let pending = report.unrecorded_positions();
    let mut slots = report.into_slots();

    match result {
        Ok(state) => {
            debug!(batch = sequence, %state, "batch executed");
        }
        Err(e) if objects.len() == 1 => {
            warn!(batch = sequence, error = %e, "plugin failed on object {}", objects[0].id());
            if !pending.is_empty() {
                slots[0] = Some(failure_item(ctx, &objects[0], &e.to_string()));
            }
        }
        Err(e) => {
            warn!(
                batch = sequence,
                error = %e,
                unrecorded = pending.len(),
                "plugin failed on batch, isolating unrecorded objects"
            );
            for pos in pending {
                let object = &objects[pos];
                let (report, retry) = execute_guarded(plugin, ctx, std::slice::from_ref(object));
                let mut retried = report.into_slots();
                slots[pos] = match (retried.pop().flatten(), retry) {
                    (Some(item), _) => Some(item),
                    (None, Err(e)) => {
                        warn!(batch = sequence, error = %e, "plugin failed on object {}", object.id());
                        Some(failure_item(ctx, object, &e.to_string()))
                    }
                    (None, Ok(_)) => None,
                };
            }
        }
    }

    slots
        .into_iter()
        .zip(objects)
        .map(|(slot, object)| match slot {
            Some(item) if item.plugin_state.is_final() => item,
            Some(item) => item.finish(PluginState::Failure, "plugin left the outcome unfinished"),
            None => failure_item(ctx, object, "plugin recorded no outcome"),
        })
        .collect()
}

fn execute_guarded(
    plugin: &mut dyn Plugin,
    ctx: &JobContext,
    objects: &[RetrievedObject],
) -> (BatchReport, Result<PluginState, PluginError>) {
    let mut report = BatchReport::new(ctx.job_id.clone(), objects);
    let result = guarded(|| plugin.execute(ctx, objects, &mut report));
    (report, result)
}

fn failure_item(ctx: &JobContext, object: &RetrievedObject, details: &str) -> ReportItem {
    ReportItem::new(&ctx.job_id, object.id(), Some(object.object.object_type()))
        .finish(PluginState::Failure, details)
}
