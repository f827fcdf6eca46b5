//! Sequenced change events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use super::{Action, StreamKey};

/// A change that has not been appended yet
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub stream_key: StreamKey,
    pub action: Action,
    pub actor_id: String,
    pub payload: serde_json::Value,
}

impl NewEvent {
    pub fn new(
        stream_key: StreamKey,
        action: impl Into<Action>,
        actor_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            stream_key,
            action: action.into(),
            actor_id: actor_id.into(),
            payload,
        }
    }
}

/// An appended change event
///
/// Events are immutable once appended. `sequence` starts at 1 and is gapless
/// and strictly increasing within the `entity_type:entity_id` stream; there
/// is no ordering across streams.
///
/// Serialized as a flat record:
///
/// ```text
/// {"id":"...","entity_type":"repository","entity_id":"42","action":"comment_added",
///  "actor_id":"u2","payload":{...},"sequence":7,"created_at":"..."}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Event {
    /// Unique event identifier (UUIDv7)
    pub id: Uuid,
    pub entity_type: String,
    pub entity_id: String,
    #[cfg_attr(feature = "openapi", schema(value_type = String))]
    pub action: Action,
    pub actor_id: String,
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub payload: serde_json::Value,
    /// Position within the stream, starting at 1
    pub sequence: i64,
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Stamp a new event with its identity and stream position
    pub fn from_new(new_event: NewEvent, sequence: i64) -> Self {
        Self {
            id: Uuid::now_v7(),
            entity_type: new_event.stream_key.entity_type().to_string(),
            entity_id: new_event.stream_key.entity_id().to_string(),
            action: new_event.action,
            actor_id: new_event.actor_id,
            payload: new_event.payload,
            sequence,
            created_at: Utc::now(),
        }
    }

    /// The stream this event belongs to
    pub fn stream_key(&self) -> StreamKey {
        StreamKey::from_stored(self.entity_type.clone(), self.entity_id.clone())
    }

    /// String field from the payload, if present
    pub fn payload_str(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_new_copies_stream_parts() {
        let new_event = NewEvent::new(
            StreamKey::repository("42").unwrap(),
            Action::CommentAdded,
            "u2",
            json!({"content": "nice"}),
        );
        let event = Event::from_new(new_event, 3);

        assert_eq!(event.entity_type, "repository");
        assert_eq!(event.entity_id, "42");
        assert_eq!(event.sequence, 3);
        assert_eq!(event.stream_key(), StreamKey::repository("42").unwrap());
        assert_eq!(event.payload_str("content"), Some("nice"));
        assert_eq!(event.payload_str("missing"), None);
    }

    #[test]
    fn test_serializes_flat() {
        let event = Event::from_new(
            NewEvent::new(StreamKey::inbox("u1").unwrap(), "notification_created", "u2", json!({})),
            1,
        );
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["entity_type"], "user");
        assert_eq!(value["entity_id"], "u1:inbox");
        assert_eq!(value["action"], "notification_created");
        assert_eq!(value["sequence"], 1);
    }
}
