//! Per-batch report fragment filled in by a plugin.

use log::warn;

use crate::model::{ObjectType, PluginState, ReportItem};
use crate::retrieval::RetrievedObject;

struct Slot {
    object_id: String,
    object_type: Option<ObjectType>,
    item: Option<ReportItem>,
}

/// Holds at most one item per object of a batch, in batch order.
pub struct BatchReport {
    job_id: String,
    slots: Vec<Slot>,
}

impl BatchReport {
    pub fn new(job_id: impl Into<String>, objects: &[RetrievedObject]) -> Self {
        Self {
            job_id: job_id.into(),
            slots: objects
                .iter()
                .map(|o| Slot {
                    object_id: o.id().to_string(),
                    object_type: Some(o.object.object_type()),
                    item: None,
                })
                .collect(),
        }
    }

    /// A RUNNING item for `object_id`, to be finished and recorded.
    pub fn start(&self, object_id: &str) -> ReportItem {
        let object_type = self
            .slots
            .iter()
            .find(|s| s.object_id == object_id)
            .and_then(|s| s.object_type);
        ReportItem::new(self.job_id.clone(), object_id, object_type)
    }

    /// Records an outcome with fresh timestamps.
    pub fn record(&mut self, object_id: &str, state: PluginState, details: impl Into<String>) -> bool {
        let item = self.start(object_id).finish(state, details);
        self.record_item(item)
    }

    /// Records a prepared item. Returns false if the object is not part of
    /// this batch. Recording twice for the same object keeps the last item.
    pub fn record_item(&mut self, mut item: ReportItem) -> bool {
        item.job_id = self.job_id.clone();

        let position = self
            .slots
            .iter()
            .position(|s| s.object_id == item.source_object_id && s.item.is_none())
            .or_else(|| {
                self.slots
                    .iter()
                    .position(|s| s.object_id == item.source_object_id)
            });

        match position {
            Some(pos) => {
                let slot = &mut self.slots[pos];
                if item.source_object_type.is_none() {
                    item.source_object_type = slot.object_type;
                }
                slot.item = Some(item);
                true
            }
            None => {
                warn!(
                    "Ignoring report item for object '{}' outside the batch",
                    item.source_object_id
                );
                false
            }
        }
    }

    /// Positions (in batch order) of objects without an outcome.
    pub fn unrecorded_positions(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.item.is_none())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// FAILURE if any recorded item failed, SUCCESS otherwise.
    pub fn aggregate_state(&self) -> PluginState {
        let failed = self
            .slots
            .iter()
            .filter_map(|s| s.item.as_ref())
            .any(|i| i.plugin_state.is_failure());
        if failed {
            PluginState::Failure
        } else {
            PluginState::Success
        }
    }

    /// Items in batch order; `None` where nothing was recorded.
    pub fn into_slots(self) -> Vec<Option<ReportItem>> {
        self.slots.into_iter().map(|s| s.item).collect()
    }
}
