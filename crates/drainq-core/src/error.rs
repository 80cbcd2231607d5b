use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DrainqError>;

/// Errors surfaced by queue, lock and drain operations.
///
/// Lock contention is not represented here: `lock()` returning `false` and
/// `run_with_lock` returning `None` are ordinary outcomes.
#[derive(Debug, Error)]
pub enum DrainqError {
    /// The backing table or cache is unreachable or rejected an operation.
    #[error("storage error on {resource}: {message}")]
    Storage { resource: String, message: String },

    /// A configured target or value could not be resolved.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A dequeued record could not be decoded or was rejected by the parser.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("payload could not be encoded: {0}")]
    Encode(#[source] serde_json::Error),
}

impl DrainqError {
    pub fn storage(resource: impl Into<String>, err: impl fmt::Display) -> Self {
        Self::Storage {
            resource: resource.into(),
            message: err.to_string(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedPayload(message.into())
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage { .. })
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::MalformedPayload(_))
    }
}
