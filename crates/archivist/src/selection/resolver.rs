use std::collections::VecDeque;
use std::sync::Arc;

use log::debug;

use crate::model::{ObjectType, SelectedObjects};

use super::error::{IndexError, SelectionError};
use super::filter::{Filter, Sublist};

/// Search/index collaborator used to resolve filter selections.
pub trait ObjectIndex: Send + Sync {
    fn count(&self, filter: &Filter, object_type: ObjectType) -> Result<u64, IndexError>;

    /// Returns the ids in the requested window, in a stable order.
    fn find(
        &self,
        filter: &Filter,
        object_type: ObjectType,
        sublist: Sublist,
    ) -> Result<Vec<String>, IndexError>;
}

pub struct SelectionResolver {
    index: Arc<dyn ObjectIndex>,
    page_size: u64,
}

impl SelectionResolver {
    pub fn new(index: Arc<dyn ObjectIndex>, page_size: usize) -> Self {
        Self {
            index,
            page_size: page_size.max(1) as u64,
        }
    }

    /// Static checks that need no collaborator.
    pub fn validate(selection: &SelectedObjects) -> Result<(), SelectionError> {
        match selection {
            SelectedObjects::List { ids } => {
                if let Some(pos) = ids.iter().position(|id| id.trim().is_empty()) {
                    return Err(SelectionError::InvalidSelection(format!(
                        "blank object id at position {}",
                        pos
                    )));
                }
                Ok(())
            }
            SelectedObjects::Filter { filter, .. } => filter.validate(),
        }
    }

    /// Resolves the selection into a counted id stream.
    ///
    /// Filter selections are counted up front; the ids are paged lazily as the
    /// stream is consumed.
    pub fn resolve(&self, selection: &SelectedObjects) -> Result<ResolvedSelection, SelectionError> {
        Self::validate(selection)?;

        match selection {
            SelectedObjects::List { ids } => Ok(ResolvedSelection {
                total: ids.len() as u64,
                object_type: None,
                source: Source::List(ids.clone().into_iter()),
            }),
            SelectedObjects::Filter {
                filter,
                object_type,
            } => {
                let total = self.index.count(filter, *object_type)?;
                debug!(
                    "Filter selection over {} resolved to {} objects",
                    object_type, total
                );
                Ok(ResolvedSelection {
                    total,
                    object_type: Some(*object_type),
                    source: Source::Paged(PagedSource {
                        index: Arc::clone(&self.index),
                        filter: filter.clone(),
                        object_type: *object_type,
                        page_size: self.page_size,
                        next_offset: 0,
                        buffer: VecDeque::new(),
                        done: false,
                    }),
                })
            }
        }
    }
}

/// A resolved selection: known total plus a lazy, fused id stream.
///
/// The stream never yields more than `total` ids, so objects added to the
/// index after resolution started cannot push progress past 100%.
pub struct ResolvedSelection {
    total: u64,
    object_type: Option<ObjectType>,
    source: Source,
}

enum Source {
    List(std::vec::IntoIter<String>),
    Paged(PagedSource),
    Exhausted,
}

struct PagedSource {
    index: Arc<dyn ObjectIndex>,
    filter: Filter,
    object_type: ObjectType,
    page_size: u64,
    next_offset: u64,
    buffer: VecDeque<String>,
    done: bool,
}

impl PagedSource {
    fn next_id(&mut self, total: u64) -> Option<Result<String, SelectionError>> {
        if let Some(id) = self.buffer.pop_front() {
            return Some(Ok(id));
        }
        if self.done || self.next_offset >= total {
            return None;
        }

        let limit = self.page_size.min(total - self.next_offset);
        let page = match self.index.find(
            &self.filter,
            self.object_type,
            Sublist::new(self.next_offset, limit),
        ) {
            Ok(page) => page,
            Err(e) => {
                self.done = true;
                return Some(Err(e.into()));
            }
        };

        if (page.len() as u64) < limit {
            self.done = true;
        }
        self.next_offset += page.len() as u64;
        self.buffer.extend(page.into_iter().take(limit as usize));
        self.buffer.pop_front().map(Ok)
    }
}

impl ResolvedSelection {
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Object type shared by every id, when the selection guarantees one.
    pub fn object_type(&self) -> Option<ObjectType> {
        self.object_type
    }
}

impl Iterator for ResolvedSelection {
    type Item = Result<String, SelectionError>;

    fn next(&mut self) -> Option<Self::Item> {
        let total = self.total;
        let next = match &mut self.source {
            Source::List(ids) => ids.next().map(Ok),
            Source::Paged(paged) => paged.next_id(total),
            Source::Exhausted => None,
        };

        match next {
            Some(Ok(id)) => Some(Ok(id)),
            Some(Err(e)) => {
                self.source = Source::Exhausted;
                Some(Err(e))
            }
            None => {
                self.source = Source::Exhausted;
                None
            }
        }
    }
}
