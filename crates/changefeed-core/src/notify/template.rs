//! Notification text templates

use minijinja::{Environment, UndefinedBehavior, Value};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::directory::RepositoryRecord;
use crate::error::ChangefeedError;
use crate::event::Event;

/// Title, description and link templates for one rule
///
/// Each part is a minijinja template rendered against:
/// - `event`: `id`, `entity_type`, `entity_id`, `action`, `actor_id`, `sequence`
/// - `payload`: the event payload
/// - `repository`: `id`, `name`, `owner_id` (undefined when unknown)
/// - `actor_name`: payload `actor_name`, falling back to the actor id
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationTemplate {
    pub title: String,
    pub description: String,
    pub link: String,
}

/// Rendered notification text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedText {
    pub title: String,
    pub description: String,
    pub link: String,
}

impl NotificationTemplate {
    pub fn new(title: impl Into<String>, description: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            link: link.into(),
        }
    }

    pub fn render(&self, renderer: &TemplateRenderer, context: &Value) -> Result<RenderedText, ChangefeedError> {
        Ok(RenderedText {
            title: renderer.render(&self.title, context)?,
            description: renderer.render(&self.description, context)?,
            link: renderer.render(&self.link, context)?,
        })
    }
}

/// Shared minijinja environment
///
/// Missing fields render empty and attribute lookups on them chain, so a
/// payload without an optional field never fails a notification.
pub struct TemplateRenderer {
    env: Environment<'static>,
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Chainable);
        Self { env }
    }
}

impl TemplateRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render(&self, source: &str, context: &Value) -> Result<String, ChangefeedError> {
        Ok(self.env.render_str(source, context)?.trim().to_string())
    }

    /// Build the template context for an event
    pub fn context(event: &Event, repository: Option<&RepositoryRecord>) -> Value {
        let actor_name = event.payload_str("actor_name").unwrap_or(&event.actor_id);
        let mut context = json!({
            "event": {
                "id": event.id,
                "entity_type": event.entity_type,
                "entity_id": event.entity_id,
                "action": event.action.as_str(),
                "actor_id": event.actor_id,
                "sequence": event.sequence,
            },
            "payload": event.payload,
            "actor_name": actor_name,
        });
        // Left out entirely when unknown so lookups on it chain to undefined
        if let Some(repository) = repository {
            context["repository"] = json!(repository);
        }
        Value::from_serialize(&context)
    }
}
