//! Notification records delivered to recipient inboxes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Kind of notification, as shown in the inbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    CommentAdded,
    FileChanged,
    PrCreated,
    PrClosed,
    PrMerged,
    RepositoryStarred,
    MessageReceived,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CommentAdded => "comment_added",
            Self::FileChanged => "file_changed",
            Self::PrCreated => "pr_created",
            Self::PrClosed => "pr_closed",
            Self::PrMerged => "pr_merged",
            Self::RepositoryStarred => "repository_starred",
            Self::MessageReceived => "message_received",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "comment_added" => Some(Self::CommentAdded),
            "file_changed" => Some(Self::FileChanged),
            "pr_created" => Some(Self::PrCreated),
            "pr_closed" => Some(Self::PrClosed),
            "pr_merged" => Some(Self::PrMerged),
            "repository_starred" => Some(Self::RepositoryStarred),
            "message_received" => Some(Self::MessageReceived),
            _ => None,
        }
    }
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user-facing notification
///
/// Every notification traces back to exactly one source event, and a
/// recipient holds at most one notification per source event. Only the
/// read flag and the archive timestamp ever change after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub title: String,
    pub description: String,
    pub link: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
    pub source_event_id: Uuid,
    /// Set when the recipient archives the notification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
}

impl Notification {
    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }
}

/// Result of an idempotent notification insert
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    /// The notification was stored
    Inserted(Notification),
    /// A notification for the same `(source_event_id, recipient_id)` already exists
    Duplicate,
}

/// Result of marking a single notification read
#[derive(Debug, Clone, PartialEq)]
pub struct MarkReadOutcome {
    pub notification: Notification,
    /// False when the notification was already read
    pub changed: bool,
}

/// Filters for listing an inbox
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub unread_only: bool,
    pub include_archived: bool,
    pub limit: Option<usize>,
}

impl ListOptions {
    pub fn unread() -> Self {
        Self {
            unread_only: true,
            ..Default::default()
        }
    }

    /// Whether a notification passes the filters (limit aside)
    pub fn matches(&self, notification: &Notification) -> bool {
        if self.unread_only && notification.read {
            return false;
        }
        if !self.include_archived && notification.is_archived() {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(read: bool, archived: bool) -> Notification {
        Notification {
            id: Uuid::now_v7(),
            recipient_id: "u1".into(),
            notification_type: NotificationType::CommentAdded,
            title: "New comment".into(),
            description: "u2 commented".into(),
            link: "/repositories/42".into(),
            read,
            created_at: Utc::now(),
            source_event_id: Uuid::now_v7(),
            archived_at: archived.then(Utc::now),
        }
    }

    #[test]
    fn test_type_field_name_on_the_wire() {
        let value = serde_json::to_value(sample(false, false)).unwrap();
        assert_eq!(value["type"], "comment_added");
        assert_eq!(value["read"], false);
        assert!(value.get("archived_at").is_none());
    }

    #[test]
    fn test_type_parse_matches_as_str() {
        for t in [
            NotificationType::CommentAdded,
            NotificationType::FileChanged,
            NotificationType::PrCreated,
            NotificationType::PrClosed,
            NotificationType::PrMerged,
            NotificationType::RepositoryStarred,
            NotificationType::MessageReceived,
        ] {
            assert_eq!(NotificationType::parse(t.as_str()), Some(t));
        }
        assert_eq!(NotificationType::parse("bogus"), None);
    }

    #[test]
    fn test_list_options_filters() {
        let default = ListOptions::default();
        assert!(default.matches(&sample(true, false)));
        assert!(!default.matches(&sample(false, true)));

        let unread = ListOptions::unread();
        assert!(unread.matches(&sample(false, false)));
        assert!(!unread.matches(&sample(true, false)));

        let all = ListOptions {
            include_archived: true,
            ..Default::default()
        };
        assert!(all.matches(&sample(true, true)));
    }
}
