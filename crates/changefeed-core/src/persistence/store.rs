//! EventLog and NotificationStore trait definitions

use async_trait::async_trait;
use uuid::Uuid;

use crate::event::{Event, NewEvent, StreamKey};
use crate::notify::{InsertOutcome, ListOptions, MarkReadOutcome, Notification};

/// Error type for store operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The durable store cannot be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Notification not found
    #[error("notification not found: {0}")]
    NotificationNotFound(Uuid),

    /// Database error that retrying will not fix
    #[error("database error: {0}")]
    Database(String),

    /// The store refused the data itself (invalid value, constraint)
    #[error("rejected by store: {0}")]
    Rejected(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether the operation may succeed if retried
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Durable, append-only log of change events
///
/// Implementations must be thread-safe. Appends to the same stream are
/// serialized so no two events share a sequence; appends to different
/// streams must not block each other. An event is either fully durable or
/// invisible to readers.
#[async_trait]
pub trait EventLog: Send + Sync + 'static {
    /// Append an event, assigning the next sequence of its stream
    async fn append(&self, event: NewEvent) -> Result<Event, StoreError>;

    /// Read up to `limit` events with `sequence >= from_sequence`, in order
    ///
    /// An unknown stream reads as empty.
    async fn read(
        &self,
        stream_key: &StreamKey,
        from_sequence: i64,
        limit: usize,
    ) -> Result<Vec<Event>, StoreError>;

    /// Highest sequence assigned in the stream (0 if none)
    async fn head_sequence(&self, stream_key: &StreamKey) -> Result<i64, StoreError>;
}

/// Inbox storage for derived notifications
///
/// State is partitioned by recipient; no operation needs to lock across
/// recipients.
#[async_trait]
pub trait NotificationStore: Send + Sync + 'static {
    /// Insert unless a notification with the same `(source_event_id, recipient_id)` exists
    ///
    /// The existence check and the insert are atomic.
    async fn insert_if_absent(&self, notification: Notification)
        -> Result<InsertOutcome, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Notification, StoreError>;

    /// List a recipient's notifications, newest first
    async fn list(
        &self,
        recipient_id: &str,
        options: &ListOptions,
    ) -> Result<Vec<Notification>, StoreError>;

    /// Mark one notification read; already-read is a no-op
    async fn mark_read(&self, id: Uuid) -> Result<MarkReadOutcome, StoreError>;

    /// Mark every unread notification of the recipient read
    ///
    /// Notifications inserted concurrently with this call stay unread.
    /// Returns the number of notifications changed.
    async fn mark_all_read(&self, recipient_id: &str) -> Result<u64, StoreError>;

    /// Soft-archive a notification; archiving twice keeps the first timestamp
    async fn archive(&self, id: Uuid) -> Result<Notification, StoreError>;

    /// Number of unread, unarchived notifications
    async fn unread_count(&self, recipient_id: &str) -> Result<u64, StoreError>;

    /// Notifications of an event whose inbox announcement is still
    /// unclaimed, oldest first
    ///
    /// Includes notifications inserted by an earlier attempt whose caller
    /// failed before announcing them.
    async fn unannounced(&self, source_event_id: Uuid) -> Result<Vec<Notification>, StoreError>;

    /// Claim the inbox announcement of a notification
    ///
    /// Atomic: exactly one caller gets `true`.
    async fn claim_announcement(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Hand back a claim whose announcement could not be appended
    async fn release_announcement(&self, id: Uuid) -> Result<(), StoreError>;
}
