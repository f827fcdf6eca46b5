//! Notification Deriver
//!
//! Turns change events into inbox notifications by evaluating the rule
//! table. Safe to run any number of times for the same event: the store
//! refuses a second notification for the same `(source_event_id,
//! recipient_id)`.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::directory::{EntityDirectory, RepositoryRecord};
use super::notification::{InsertOutcome, Notification};
use super::rule::{default_rules, NotificationRule, RecipientResolver};
use super::template::TemplateRenderer;
use crate::error::ChangefeedError;
use crate::event::Event;
use crate::persistence::NotificationStore;

pub struct NotificationDeriver {
    rules: Vec<NotificationRule>,
    store: Arc<dyn NotificationStore>,
    directory: Arc<dyn EntityDirectory>,
    renderer: TemplateRenderer,
}

impl NotificationDeriver {
    /// Deriver with the built-in rule table
    pub fn new(store: Arc<dyn NotificationStore>, directory: Arc<dyn EntityDirectory>) -> Self {
        Self::with_rules(store, directory, default_rules())
    }

    pub fn with_rules(
        store: Arc<dyn NotificationStore>,
        directory: Arc<dyn EntityDirectory>,
        rules: Vec<NotificationRule>,
    ) -> Self {
        Self {
            rules,
            store,
            directory,
            renderer: TemplateRenderer::new(),
        }
    }

    /// Derive and persist notifications for an event
    ///
    /// Returns only the notifications created by this call. Recipients that
    /// already hold a notification for the event are skipped, so a redelivered
    /// event returns an empty set.
    #[instrument(skip(self, event), fields(event_id = %event.id, action = %event.action))]
    pub async fn on_event(&self, event: &Event) -> Result<Vec<Notification>, ChangefeedError> {
        let matching: Vec<&NotificationRule> =
            self.rules.iter().filter(|r| r.matches(&event.action)).collect();
        if matching.is_empty() {
            return Ok(vec![]);
        }

        let repository = self.repository_for(event).await?;
        let context = TemplateRenderer::context(event, repository.as_ref());

        let mut created = vec![];
        for rule in matching {
            for recipient in self.resolve(rule, event, repository.as_ref()) {
                if rule.exclude_actor && recipient == event.actor_id {
                    debug!(recipient = %recipient, "actor excluded");
                    continue;
                }
                if !self.directory.notifications_enabled(&recipient).await? {
                    debug!(recipient = %recipient, "notifications disabled");
                    continue;
                }

                let text = rule.template.render(&self.renderer, &context)?;
                let notification = Notification {
                    id: Uuid::now_v7(),
                    recipient_id: recipient.clone(),
                    notification_type: rule.notification_type,
                    title: text.title,
                    description: text.description,
                    link: text.link,
                    read: false,
                    created_at: Utc::now(),
                    source_event_id: event.id,
                    archived_at: None,
                };

                match self.store.insert_if_absent(notification).await? {
                    InsertOutcome::Inserted(notification) => created.push(notification),
                    InsertOutcome::Duplicate => {
                        debug!(recipient = %recipient, "duplicate notification suppressed");
                    }
                }
            }
        }

        Ok(created)
    }

    /// The repository an event concerns, if the directory knows it
    async fn repository_for(&self, event: &Event) -> Result<Option<RepositoryRecord>, ChangefeedError> {
        let id = if event.entity_type == "repository" {
            Some(event.entity_id.as_str())
        } else {
            event.payload_str("repository_id")
        };
        match id {
            Some(id) => Ok(self.directory.repository(id).await?),
            None => Ok(None),
        }
    }

    /// Recipient ids for a rule, without duplicates, in resolution order
    fn resolve(
        &self,
        rule: &NotificationRule,
        event: &Event,
        repository: Option<&RepositoryRecord>,
    ) -> Vec<String> {
        let candidates: Vec<String> = match &rule.recipient_resolver {
            RecipientResolver::RepositoryOwner => repository
                .map(|r| r.owner_id.clone())
                .or_else(|| event.payload_str("owner_id").map(str::to_string))
                .into_iter()
                .collect(),
            RecipientResolver::PayloadField(field) => match event.payload.get(field) {
                Some(serde_json::Value::String(id)) => vec![id.clone()],
                Some(serde_json::Value::Array(ids)) => ids
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
                _ => vec![],
            },
            RecipientResolver::Fixed(ids) => ids.clone(),
        };

        let mut recipients: Vec<String> = Vec::with_capacity(candidates.len());
        for id in candidates {
            if !id.is_empty() && !recipients.contains(&id) {
                recipients.push(id);
            }
        }
        recipients
    }
}
