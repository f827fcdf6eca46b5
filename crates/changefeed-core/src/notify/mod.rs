//! Notification Deriver and inbox types
//!
//! - [`NotificationRule`] / [`default_rules`] - which actions notify whom
//! - [`NotificationDeriver`] - evaluates rules and persists notifications
//! - [`EntityDirectory`] - repository owners and user settings
//! - [`Notification`] - the inbox record

mod deriver;
mod directory;
mod notification;
mod rule;
mod template;

pub use deriver::NotificationDeriver;
pub use directory::{EntityDirectory, InMemoryDirectory, RepositoryRecord, UserSettings};
pub use notification::{
    InsertOutcome, ListOptions, MarkReadOutcome, Notification, NotificationType,
};
pub use rule::{default_rules, NotificationRule, RecipientResolver};
pub use template::{NotificationTemplate, RenderedText, TemplateRenderer};
