use thiserror::Error;

/// Errors raised by the index collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    /// The query itself is malformed; retrying will not help.
    #[error("Invalid index query: {0}")]
    InvalidQuery(String),

    #[error("Index unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Index lookup failed: {0}")]
    Index(IndexError),
}

impl SelectionError {
    /// Whether the error stems from the request rather than the collaborator.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SelectionError::InvalidSelection(_)
                | SelectionError::InvalidFilter(_)
                | SelectionError::Index(IndexError::InvalidQuery(_))
        )
    }
}

impl From<IndexError> for SelectionError {
    fn from(err: IndexError) -> Self {
        SelectionError::Index(err)
    }
}
