//! Error types for the commit log façade.

use segmentlog_config::ConfigError;
use segmentlog_storage::StorageError;
use thiserror::Error;

/// Result type for commit log operations.
pub type Result<T, E = CommitLogError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum CommitLogError {
    /// Codec, segment, or filesystem failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The topic has no entry in the configuration.
    #[error("topic '{topic}' is not configured")]
    TopicNotConfigured { topic: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// The appender, reader, or factory was disposed before the request ran.
    #[error("commit log for topic '{topic}' has been disposed")]
    Disposed { topic: String },

    /// A batch append carried no records.
    #[error("cannot append an empty batch")]
    EmptyBatch,

    /// No tokio runtime to run background or blocking work on.
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl CommitLogError {
    pub(crate) fn disposed(topic: impl ToString) -> Self {
        Self::Disposed {
            topic: topic.to_string(),
        }
    }

    /// Returns true if the error came from damaged bytes on disk.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Storage(e) if e.is_corruption())
    }
}

impl From<tokio::task::JoinError> for CommitLogError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Runtime(e.to_string())
    }
}
