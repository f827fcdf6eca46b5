//! Declarative rules mapping change events to notifications

use serde::{Deserialize, Serialize};

use super::notification::NotificationType;
use super::template::NotificationTemplate;
use crate::event::Action;

/// How a rule finds the users to notify
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RecipientResolver {
    /// Owner of the repository the event belongs to
    ///
    /// Looked up in the entity directory; a payload `owner_id` is used when
    /// the directory does not know the repository.
    RepositoryOwner,
    /// User ids in a payload field (a string or an array of strings)
    PayloadField(String),
    /// A fixed set of users
    Fixed(Vec<String>),
}

/// Maps one action to zero or more notifications
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationRule {
    pub trigger_action: Action,
    pub notification_type: NotificationType,
    pub recipient_resolver: RecipientResolver,
    /// Skip the recipient when they caused the event
    pub exclude_actor: bool,
    pub template: NotificationTemplate,
}

impl NotificationRule {
    pub fn new(
        trigger_action: impl Into<Action>,
        notification_type: NotificationType,
        recipient_resolver: RecipientResolver,
        template: NotificationTemplate,
    ) -> Self {
        Self {
            trigger_action: trigger_action.into(),
            notification_type,
            recipient_resolver,
            exclude_actor: false,
            template,
        }
    }

    pub fn excluding_actor(mut self) -> Self {
        self.exclude_actor = true;
        self
    }

    pub fn matches(&self, action: &Action) -> bool {
        &self.trigger_action == action
    }
}

const REPOSITORY_LINK: &str = "/repositories/{{ event.entity_id }}";
const REPOSITORY_NAME: &str = "{{ repository.name or event.entity_id }}";

fn file_rule(action: Action, verb: &str) -> NotificationRule {
    NotificationRule::new(
        action,
        NotificationType::FileChanged,
        RecipientResolver::RepositoryOwner,
        NotificationTemplate::new(
            format!("File {verb}"),
            format!("{{{{ actor_name }}}} {verb} {{{{ payload.path }}}} in {REPOSITORY_NAME}"),
            REPOSITORY_LINK,
        ),
    )
}

fn pull_request_rule(action: Action, notification_type: NotificationType, verb: &str) -> NotificationRule {
    NotificationRule::new(
        action,
        notification_type,
        RecipientResolver::RepositoryOwner,
        NotificationTemplate::new(
            format!("Pull request {verb}"),
            format!("{{{{ actor_name }}}} {verb} {{{{ payload.title or 'a pull request' }}}} in {REPOSITORY_NAME}"),
            REPOSITORY_LINK,
        ),
    )
}

/// The built-in rule table
///
/// | action | recipients | actor excluded |
/// |---|---|---|
/// | `comment_added` | repository owner | yes |
/// | `file_created` / `file_updated` / `file_deleted` | repository owner | no |
/// | `pr_opened` / `pr_closed` / `pr_merged` | repository owner | no |
/// | `repository_starred` | repository owner | yes |
/// | `message_sent` | payload `recipient_id` | yes |
pub fn default_rules() -> Vec<NotificationRule> {
    vec![
        NotificationRule::new(
            Action::CommentAdded,
            NotificationType::CommentAdded,
            RecipientResolver::RepositoryOwner,
            NotificationTemplate::new(
                "New comment",
                format!("{{{{ actor_name }}}} commented on {REPOSITORY_NAME}"),
                REPOSITORY_LINK,
            ),
        )
        .excluding_actor(),
        file_rule(Action::FileCreated, "created"),
        file_rule(Action::FileUpdated, "updated"),
        file_rule(Action::FileDeleted, "deleted"),
        pull_request_rule(Action::PrOpened, NotificationType::PrCreated, "opened"),
        pull_request_rule(Action::PrClosed, NotificationType::PrClosed, "closed"),
        pull_request_rule(Action::PrMerged, NotificationType::PrMerged, "merged"),
        NotificationRule::new(
            Action::RepositoryStarred,
            NotificationType::RepositoryStarred,
            RecipientResolver::RepositoryOwner,
            NotificationTemplate::new(
                "New star",
                format!("{{{{ actor_name }}}} starred {REPOSITORY_NAME}"),
                REPOSITORY_LINK,
            ),
        )
        .excluding_actor(),
        NotificationRule::new(
            Action::MessageSent,
            NotificationType::MessageReceived,
            RecipientResolver::PayloadField("recipient_id".into()),
            NotificationTemplate::new(
                "New message",
                "{{ actor_name }}: {{ payload.content }}",
                "/messages/{{ event.entity_id }}",
            ),
        )
        .excluding_actor(),
    ]
}
