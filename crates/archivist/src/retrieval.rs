//! Object retrieval collaborator: dereferences ids into objects plus content.

use std::fmt;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::model::ArchivedObject;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RetrievalError {
    #[error("Object '{0}' not found")]
    NotFound(String),

    #[error("Access to object '{id}' denied: {reason}")]
    AccessDenied { id: String, reason: String },

    #[error("Retrieval backend error: {0}")]
    Backend(String),
}

/// Direct access to an object's bitstream.
pub trait ContentHandle: Send + Sync {
    fn open(&self) -> io::Result<Box<dyn Read + Send>>;

    fn size_hint(&self) -> Option<u64> {
        None
    }
}

/// Content held in memory.
pub struct BytesContent(Arc<Vec<u8>>);

impl BytesContent {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(Arc::new(bytes.into()))
    }
}

impl ContentHandle for BytesContent {
    fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(io::Cursor::new(SharedBytes(Arc::clone(&self.0)))))
    }

    fn size_hint(&self) -> Option<u64> {
        Some(self.0.len() as u64)
    }
}

struct SharedBytes(Arc<Vec<u8>>);

impl AsRef<[u8]> for SharedBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Content stored on the local filesystem.
pub struct FileContent {
    path: PathBuf,
}

impl FileContent {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ContentHandle for FileContent {
    fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(io::BufReader::new(std::fs::File::open(
            &self.path,
        )?)))
    }

    fn size_hint(&self) -> Option<u64> {
        std::fs::metadata(&self.path).ok().map(|m| m.len())
    }
}

/// A dereferenced object handed to a plugin.
#[derive(Clone)]
pub struct RetrievedObject {
    pub object: ArchivedObject,
    pub content: Option<Arc<dyn ContentHandle>>,
}

impl RetrievedObject {
    pub fn new(object: ArchivedObject) -> Self {
        Self {
            object,
            content: None,
        }
    }

    pub fn with_content(mut self, content: Arc<dyn ContentHandle>) -> Self {
        self.content = Some(content);
        self
    }

    pub fn id(&self) -> &str {
        self.object.id()
    }
}

impl fmt::Debug for RetrievedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetrievedObject")
            .field("object", &self.object)
            .field("has_content", &self.content.is_some())
            .finish()
    }
}

pub trait ObjectRetrieval: Send + Sync {
    fn retrieve(&self, id: &str) -> Result<RetrievedObject, RetrievalError>;
}
