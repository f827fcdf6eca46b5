//! # Changefeed Core
//!
//! Event notification and live-sync core: an ordered change feed per entity,
//! live subscriptions that bridge push delivery and catch-up reads, and
//! rule-driven notifications with idempotent inbox writes.
//!
//! ## Features
//!
//! - **Gapless per-stream sequences**: appends to one stream serialize, different streams never contend
//! - **Exactly-once, in-order delivery**: subscribers see every sequence once, even under concurrent appenders
//! - **Bounded backlogs**: a slow subscriber is invalidated instead of slowing anyone else
//! - **Idempotent notifications**: one notification per `(source_event_id, recipient_id)`, however often an event is redelivered
//! - **Automatic retries**: transient storage failures are retried with exponential backoff and jitter
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Changefeed                            │
//! │     (record_change, open_stream, inbox API, redrive)        │
//! └─────────────────────────────────────────────────────────────┘
//!          │                       │                      │
//!          ▼                       ▼                      ▼
//! ┌─────────────────┐   ┌─────────────────────┐   ┌──────────────────┐
//! │    EventBus     │──►│ SubscriptionRegistry │   │NotificationDeriver│
//! │ (append, read)  │   │ (push + catch-up)    │   │ (rules, inboxes)  │
//! └─────────────────┘   └─────────────────────┘   └──────────────────┘
//!          │                                              │
//!          ▼                                              ▼
//! ┌─────────────────┐                          ┌───────────────────┐
//! │    EventLog     │                          │ NotificationStore │
//! └─────────────────┘                          └───────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use changefeed_core::prelude::*;
//!
//! let (changefeed, directory) = Changefeed::in_memory(ChangefeedConfig::default());
//! directory.put_repository(RepositoryRecord {
//!     id: "42".into(),
//!     owner_id: "u1".into(),
//!     name: "dotfiles".into(),
//! });
//!
//! let mut live = changefeed
//!     .open_stream("session-1", StreamKey::repository("42")?, None)
//!     .await?;
//!
//! changefeed
//!     .record_change("repository", "42", Action::CommentAdded, "u2", json!({}))
//!     .await?;
//!
//! let event = live.next().await.unwrap()?;
//! assert_eq!(event.sequence, 1);
//! assert_eq!(changefeed.unread_count("u1").await?, 1);
//! ```

pub mod bus;
pub mod changefeed;
pub mod config;
pub mod error;
pub mod event;
pub mod notify;
pub mod persistence;
pub mod registry;
pub mod reliability;

/// Prelude for common imports
pub mod prelude {
    pub use crate::bus::EventBus;
    pub use crate::changefeed::{Changefeed, RecordedChange, RedriveReport};
    pub use crate::config::ChangefeedConfig;
    pub use crate::error::ChangefeedError;
    pub use crate::event::{Action, Event, NewEvent, StreamKey};
    pub use crate::notify::{
        EntityDirectory, InMemoryDirectory, ListOptions, Notification, NotificationDeriver,
        NotificationRule, NotificationType, RecipientResolver, RepositoryRecord, UserSettings,
    };
    pub use crate::persistence::{
        EventLog, InMemoryEventLog, InMemoryNotificationStore, NotificationStore,
        PostgresDirectory, PostgresEventLog, PostgresNotificationStore, StoreError,
    };
    pub use crate::registry::{Subscription, SubscriptionHandle, SubscriptionId, SubscriptionRegistry};
    pub use crate::reliability::RetryPolicy;
}

// Re-export key types at crate root
pub use bus::EventBus;
pub use changefeed::{Changefeed, RecordedChange, RedriveReport};
pub use config::ChangefeedConfig;
pub use error::ChangefeedError;
pub use event::{Action, Event, NewEvent, StreamKey};
pub use notify::{
    default_rules, EntityDirectory, InMemoryDirectory, InsertOutcome, ListOptions,
    MarkReadOutcome, Notification, NotificationDeriver, NotificationRule, NotificationTemplate,
    NotificationType, RecipientResolver, RepositoryRecord, UserSettings,
};
pub use persistence::{
    run_migrations, EventLog, InMemoryEventLog, InMemoryNotificationStore, NotificationStore,
    PostgresDirectory, PostgresEventLog, PostgresNotificationStore, StoreError,
};
pub use registry::{Subscription, SubscriptionHandle, SubscriptionId, SubscriptionRegistry};
pub use reliability::RetryPolicy;
