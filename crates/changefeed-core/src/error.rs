//! Errors surfaced by the change feed

use uuid::Uuid;

use crate::persistence::StoreError;

/// Error type for change feed operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChangefeedError {
    /// Durable storage could not be read or written; retry with backoff
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The subscriber fell further behind than the backlog allows.
    ///
    /// Nothing is lost: resubscribe from `last_delivered_sequence + 1` and the
    /// missed events are served from the log.
    #[error("backlog exceeded on stream {stream_key} after sequence {last_delivered_sequence}")]
    StreamBacklogExceeded {
        stream_key: String,
        last_delivered_sequence: i64,
    },

    #[error("notification not found: {0}")]
    NotificationNotFound(Uuid),

    #[error("invalid stream key: {0}")]
    InvalidStreamKey(String),

    /// The request carried data that can never be accepted as is
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A notification template failed to render
    #[error("template error: {0}")]
    Template(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ChangefeedError {
    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }

    /// Sequence to resubscribe from after a backlog overflow
    pub fn resume_from(&self) -> Option<i64> {
        match self {
            Self::StreamBacklogExceeded {
                last_delivered_sequence,
                ..
            } => Some(last_delivered_sequence + 1),
            _ => None,
        }
    }
}

impl From<StoreError> for ChangefeedError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => Self::StorageUnavailable(msg),
            StoreError::Database(msg) => Self::Internal(msg),
            StoreError::Rejected(msg) => Self::InvalidInput(msg),
            StoreError::NotificationNotFound(id) => Self::NotificationNotFound(id),
            StoreError::Serialization(msg) => Self::Serialization(msg),
        }
    }
}

impl From<minijinja::Error> for ChangefeedError {
    fn from(err: minijinja::Error) -> Self {
        Self::Template(err.to_string())
    }
}
