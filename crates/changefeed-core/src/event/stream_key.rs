//! Stream identifiers

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ChangefeedError;

const INBOX_SUFFIX: &str = ":inbox";

/// Identifies one ordered entity stream, rendered as `<entity_type>:<entity_id>`.
///
/// Parsing splits on the first `:` only, so an inbox key such as
/// `user:u1:inbox` has entity type `user` and entity id `u1:inbox`.
///
/// # Example
///
/// ```
/// use changefeed_core::StreamKey;
///
/// let key: StreamKey = "repository:42".parse().unwrap();
/// assert_eq!(key, StreamKey::repository("42").unwrap());
/// assert_eq!(StreamKey::inbox("u1").unwrap().to_string(), "user:u1:inbox");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StreamKey {
    entity_type: String,
    entity_id: String,
}

impl StreamKey {
    /// Build a key from its parts
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Result<Self, ChangefeedError> {
        let entity_type = entity_type.into();
        let entity_id = entity_id.into();
        if entity_type.is_empty() || entity_id.is_empty() || entity_type.contains(':') {
            return Err(ChangefeedError::InvalidStreamKey(format!(
                "{entity_type}:{entity_id}"
            )));
        }
        Ok(Self {
            entity_type,
            entity_id,
        })
    }

    /// Stream of a repository (comments, files, pull requests, stars)
    pub fn repository(id: impl Into<String>) -> Result<Self, ChangefeedError> {
        Self::new("repository", id)
    }

    /// A user's notification inbox
    pub fn inbox(user_id: impl AsRef<str>) -> Result<Self, ChangefeedError> {
        let user_id = user_id.as_ref();
        if user_id.is_empty() {
            return Err(ChangefeedError::InvalidStreamKey("user::inbox".to_string()));
        }
        Self::new("user", format!("{user_id}{INBOX_SUFFIX}"))
    }

    /// A global, non-entity stream such as `global:messages`
    pub fn global(name: impl Into<String>) -> Result<Self, ChangefeedError> {
        Self::new("global", name)
    }

    /// Whether this is a notification inbox, written only by the inbox itself
    pub fn is_inbox(&self) -> bool {
        self.entity_type == "user" && self.entity_id.ends_with(INBOX_SUFFIX)
    }

    /// Key of a stored event; the parts were validated when it was appended
    pub(crate) fn from_stored(entity_type: String, entity_id: String) -> Self {
        Self {
            entity_type,
            entity_id,
        }
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }
}

impl std::fmt::Display for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.entity_id)
    }
}

impl FromStr for StreamKey {
    type Err = ChangefeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((entity_type, entity_id)) => Self::new(entity_type, entity_id),
            None => Err(ChangefeedError::InvalidStreamKey(s.to_string())),
        }
    }
}

impl TryFrom<String> for StreamKey {
    type Error = ChangefeedError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StreamKey> for String {
    fn from(key: StreamKey) -> Self {
        key.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_splits_on_first_colon() {
        let key: StreamKey = "user:u1:inbox".parse().unwrap();
        assert_eq!(key.entity_type(), "user");
        assert_eq!(key.entity_id(), "u1:inbox");
        assert_eq!(key, StreamKey::inbox("u1").unwrap());
        assert!(key.is_inbox());
    }

    #[test]
    fn test_display_roundtrip() {
        let key = StreamKey::global("messages").unwrap();
        assert_eq!(key.to_string(), "global:messages");
        assert_eq!(key.to_string().parse::<StreamKey>().unwrap(), key);
    }

    #[test]
    fn test_invalid_keys() {
        assert!(matches!(
            "repository".parse::<StreamKey>(),
            Err(ChangefeedError::InvalidStreamKey(_))
        ));
        assert!("repository:".parse::<StreamKey>().is_err());
        assert!(":42".parse::<StreamKey>().is_err());
        assert!(StreamKey::new("", "42").is_err());
    }

    #[test]
    fn test_constructors_reject_empty_ids() {
        assert!(StreamKey::inbox("").is_err());
        assert!(StreamKey::repository("").is_err());
        assert!(StreamKey::global("").is_err());
        assert!(!StreamKey::repository("42").unwrap().is_inbox());
        assert!(!StreamKey::global("inbox").unwrap().is_inbox());
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&StreamKey::repository("42").unwrap()).unwrap();
        assert_eq!(json, "\"repository:42\"");

        let bad: Result<StreamKey, _> = serde_json::from_str("\"nocolon\"");
        assert!(bad.is_err());
    }
}
