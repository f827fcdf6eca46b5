//! Mutation actions recorded on the change feed

use serde::{Deserialize, Serialize};

/// The mutation an [`Event`](super::Event) records.
///
/// Known actions get their own variant; anything else is carried verbatim as
/// [`Action::Custom`] so collaborators can record new kinds of change without
/// a library release. Serialized as a bare snake_case string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Action {
    MessageSent,
    CommentAdded,
    FileCreated,
    FileUpdated,
    FileDeleted,
    PrOpened,
    PrClosed,
    PrMerged,
    RepositoryStarred,
    RepositoryForked,
    NotificationCreated,
    NotificationRead,
    NotificationsReadAll,
    Custom(String),
}

/// Wire names for the known actions
pub mod actions {
    pub const MESSAGE_SENT: &str = "message_sent";
    pub const COMMENT_ADDED: &str = "comment_added";
    pub const FILE_CREATED: &str = "file_created";
    pub const FILE_UPDATED: &str = "file_updated";
    pub const FILE_DELETED: &str = "file_deleted";
    pub const PR_OPENED: &str = "pr_opened";
    pub const PR_CLOSED: &str = "pr_closed";
    pub const PR_MERGED: &str = "pr_merged";
    pub const REPOSITORY_STARRED: &str = "repository_starred";
    pub const REPOSITORY_FORKED: &str = "repository_forked";
    pub const NOTIFICATION_CREATED: &str = "notification_created";
    pub const NOTIFICATION_READ: &str = "notification_read";
    pub const NOTIFICATIONS_READ_ALL: &str = "notifications_read_all";
}

impl Action {
    /// The snake_case wire name
    pub fn as_str(&self) -> &str {
        match self {
            Self::MessageSent => actions::MESSAGE_SENT,
            Self::CommentAdded => actions::COMMENT_ADDED,
            Self::FileCreated => actions::FILE_CREATED,
            Self::FileUpdated => actions::FILE_UPDATED,
            Self::FileDeleted => actions::FILE_DELETED,
            Self::PrOpened => actions::PR_OPENED,
            Self::PrClosed => actions::PR_CLOSED,
            Self::PrMerged => actions::PR_MERGED,
            Self::RepositoryStarred => actions::REPOSITORY_STARRED,
            Self::RepositoryForked => actions::REPOSITORY_FORKED,
            Self::NotificationCreated => actions::NOTIFICATION_CREATED,
            Self::NotificationRead => actions::NOTIFICATION_READ,
            Self::NotificationsReadAll => actions::NOTIFICATIONS_READ_ALL,
            Self::Custom(name) => name,
        }
    }

    /// Whether this action is emitted by the inbox itself rather than a collaborator
    pub fn is_inbox_action(&self) -> bool {
        matches!(
            self,
            Self::NotificationCreated | Self::NotificationRead | Self::NotificationsReadAll
        )
    }
}

impl From<&str> for Action {
    fn from(value: &str) -> Self {
        match value {
            actions::MESSAGE_SENT => Self::MessageSent,
            actions::COMMENT_ADDED => Self::CommentAdded,
            actions::FILE_CREATED => Self::FileCreated,
            actions::FILE_UPDATED => Self::FileUpdated,
            actions::FILE_DELETED => Self::FileDeleted,
            actions::PR_OPENED => Self::PrOpened,
            actions::PR_CLOSED => Self::PrClosed,
            actions::PR_MERGED => Self::PrMerged,
            actions::REPOSITORY_STARRED => Self::RepositoryStarred,
            actions::REPOSITORY_FORKED => Self::RepositoryForked,
            actions::NOTIFICATION_CREATED => Self::NotificationCreated,
            actions::NOTIFICATION_READ => Self::NotificationRead,
            actions::NOTIFICATIONS_READ_ALL => Self::NotificationsReadAll,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl From<String> for Action {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<Action> for String {
    fn from(action: Action) -> Self {
        match action {
            Action::Custom(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
