//! In-memory object catalog serving both the index and the retrieval
//! collaborators, loadable from a JSON manifest.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{ArchivedObject, ObjectType};
use crate::retrieval::{
    BytesContent, ContentHandle, FileContent, ObjectRetrieval, RetrievalError, RetrievedObject,
};
use crate::selection::{Filter, IndexError, ObjectIndex, Sublist};

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read manifest '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse manifest: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Duplicate object id in manifest: {0}")]
    DuplicateId(String),
}

/// One manifest line: an object plus optional content, either a path
/// (relative to the manifest) or inline text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub object: ArchivedObject,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    objects: Vec<CatalogEntry>,
}

struct Stored {
    object: ArchivedObject,
    content: Option<Arc<dyn ContentHandle>>,
    denied: Option<String>,
}

#[derive(Default)]
pub struct MemoryCatalog {
    objects: RwLock<BTreeMap<String, Stored>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_manifest_path(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path).map_err(|e| CatalogError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_manifest_str(&content, base)
    }

    /// Parses a manifest; relative content paths resolve against `base`.
    pub fn from_manifest_str(content: &str, base: &Path) -> Result<Self, CatalogError> {
        let manifest: Manifest = serde_json::from_str(content)?;
        let catalog = Self::new();
        {
            let mut objects = catalog.write();
            for entry in manifest.objects {
                let id = entry.object.id().to_string();
                let handle: Option<Arc<dyn ContentHandle>> = match (entry.content_path, entry.content) {
                    (Some(p), _) if p.is_absolute() => Some(Arc::new(FileContent::new(p))),
                    (Some(p), _) => Some(Arc::new(FileContent::new(base.join(p)))),
                    (None, Some(text)) => Some(Arc::new(BytesContent::new(text.into_bytes()))),
                    (None, None) => None,
                };
                let stored = Stored {
                    object: entry.object,
                    content: handle,
                    denied: None,
                };
                if objects.insert(id.clone(), stored).is_some() {
                    return Err(CatalogError::DuplicateId(id));
                }
            }
            debug!("Loaded {} objects from manifest", objects.len());
        }
        Ok(catalog)
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Stored>> {
        self.objects.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Stored>> {
        self.objects.write().unwrap_or_else(|e| e.into_inner())
    }

    fn put(&self, object: ArchivedObject, content: Option<Arc<dyn ContentHandle>>) {
        self.write().insert(
            object.id().to_string(),
            Stored {
                object,
                content,
                denied: None,
            },
        );
    }

    pub fn insert(&self, object: ArchivedObject) {
        self.put(object, None);
    }

    pub fn insert_with_content(&self, object: ArchivedObject, bytes: impl Into<Vec<u8>>) {
        self.put(object, Some(Arc::new(BytesContent::new(bytes))));
    }

    pub fn insert_with_file(&self, object: ArchivedObject, path: impl Into<PathBuf>) {
        self.put(object, Some(Arc::new(FileContent::new(path))));
    }

    pub fn remove(&self, id: &str) -> bool {
        self.write().remove(id).is_some()
    }

    /// Makes retrieval of `id` fail with access denied.
    pub fn set_access_denied(&self, id: &str, reason: impl Into<String>) -> bool {
        match self.write().get_mut(id) {
            Some(stored) => {
                stored.denied = Some(reason.into());
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    fn matching(&self, filter: &Filter, object_type: ObjectType) -> Result<Vec<String>, IndexError> {
        filter
            .validate()
            .map_err(|e| IndexError::InvalidQuery(e.to_string()))?;
        Ok(self
            .read()
            .values()
            .filter(|s| s.object.object_type() == object_type && filter.matches(&s.object))
            .map(|s| s.object.id().to_string())
            .collect())
    }
}

impl ObjectIndex for MemoryCatalog {
    fn count(&self, filter: &Filter, object_type: ObjectType) -> Result<u64, IndexError> {
        Ok(self.matching(filter, object_type)?.len() as u64)
    }

    fn find(
        &self,
        filter: &Filter,
        object_type: ObjectType,
        sublist: Sublist,
    ) -> Result<Vec<String>, IndexError> {
        Ok(self
            .matching(filter, object_type)?
            .into_iter()
            .skip(sublist.offset as usize)
            .take(sublist.limit as usize)
            .collect())
    }
}

impl ObjectRetrieval for MemoryCatalog {
    fn retrieve(&self, id: &str) -> Result<RetrievedObject, RetrievalError> {
        let objects = self.read();
        let stored = objects
            .get(id)
            .ok_or_else(|| RetrievalError::NotFound(id.to_string()))?;
        if let Some(reason) = &stored.denied {
            return Err(RetrievalError::AccessDenied {
                id: id.to_string(),
                reason: reason.clone(),
            });
        }
        let mut object = RetrievedObject::new(stored.object.clone());
        if let Some(content) = &stored.content {
            object = object.with_content(Arc::clone(content));
        }
        Ok(object)
    }
}
