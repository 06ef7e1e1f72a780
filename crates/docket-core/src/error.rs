use thiserror::Error;
use uuid::Uuid;

/// Rejections raised by board transitions. A transition that returns one of
/// these has not touched the board.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DocketError {
    #[error("{field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("group not found: {0}")]
    GroupNotFound(Uuid),
}

impl DocketError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        DocketError::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn field(&self) -> Option<&'static str> {
        match self {
            DocketError::Validation { field, .. } => Some(*field),
            _ => None,
        }
    }
}

/// A backup that cannot be applied. Import is all-or-nothing, so any of these
/// leaves the current collections in place.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("backup is not valid JSON: {0}")]
    Json(#[source] serde_json::Error),

    #[error("malformed backup: `{0}` must be present and be an array")]
    MissingArray(&'static str),

    #[error("malformed backup: {kind} #{index} is invalid: {source}")]
    BadRecord {
        kind: &'static str,
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("inconsistent backup: {0}")]
    Inconsistent(String),
}
