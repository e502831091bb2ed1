use crate::workflow::Action;

/// Failures raised by the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Corrupt table file: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Errors surfaced by every engine operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Workflow state error: {reason}")]
    WorkflowState {
        reason: String,
        available: Vec<Action>,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Search index error: {0}")]
    Search(#[from] tantivy::TantivyError),
}

impl Error {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Error::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn denied(message: impl Into<String>) -> Self {
        Error::PermissionDenied(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Error::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn workflow(reason: impl Into<String>, available: Vec<Action>) -> Self {
        Error::WorkflowState {
            reason: reason.into(),
            available,
        }
    }

    /// Whether the caller may re-fetch and try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Storage(StorageError::Io(err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
