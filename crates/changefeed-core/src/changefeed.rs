//! Changefeed facade
//!
//! The three call surfaces collaborators use: mutation intake
//! ([`Changefeed::record_change`]), live feeds ([`Changefeed::open_stream`])
//! and the inbox API. Wires the Event Bus, the Subscription Registry and the
//! Notification Deriver together.

use std::sync::Arc;

use dashmap::DashMap;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::bus::EventBus;
use crate::config::ChangefeedConfig;
use crate::error::ChangefeedError;
use crate::event::{Action, Event, NewEvent, StreamKey};
use crate::notify::{
    default_rules, EntityDirectory, InMemoryDirectory, ListOptions, Notification,
    NotificationDeriver, NotificationRule,
};
use crate::persistence::{EventLog, InMemoryEventLog, InMemoryNotificationStore, NotificationStore};
use crate::registry::{SubscriptionHandle, SubscriptionRegistry};
use crate::reliability::RetryPolicy;

/// Outcome of recording a change
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct RecordedChange {
    pub event: Event,
    /// Notifications created for the event
    pub notifications: Vec<Notification>,
}

/// Outcome of a redrive
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct RedriveReport {
    pub events_scanned: usize,
    pub notifications_created: usize,
}

/// Event notification and live-sync core
pub struct Changefeed {
    bus: EventBus,
    registry: SubscriptionRegistry,
    deriver: NotificationDeriver,
    store: Arc<dyn NotificationStore>,
    retry: RetryPolicy,
    /// Appended events whose notifications could not be derived yet
    pending: DashMap<Uuid, Event>,
}

impl Changefeed {
    pub fn new(
        log: Arc<dyn EventLog>,
        store: Arc<dyn NotificationStore>,
        directory: Arc<dyn EntityDirectory>,
        config: ChangefeedConfig,
    ) -> Self {
        Self::with_rules(log, store, directory, config, default_rules())
    }

    pub fn with_rules(
        log: Arc<dyn EventLog>,
        store: Arc<dyn NotificationStore>,
        directory: Arc<dyn EntityDirectory>,
        config: ChangefeedConfig,
        rules: Vec<NotificationRule>,
    ) -> Self {
        let registry = SubscriptionRegistry::new(log.clone(), &config);
        let bus = EventBus::new(log, registry.clone(), &config);
        let deriver = NotificationDeriver::with_rules(store.clone(), directory, rules);
        Self {
            bus,
            registry,
            deriver,
            store,
            retry: config.retry,
            pending: DashMap::new(),
        }
    }

    /// Fully in-memory changefeed; returns the directory so callers can feed it
    pub fn in_memory(config: ChangefeedConfig) -> (Self, Arc<InMemoryDirectory>) {
        let directory = Arc::new(InMemoryDirectory::new());
        let changefeed = Self::new(
            Arc::new(InMemoryEventLog::new()),
            Arc::new(InMemoryNotificationStore::new()),
            directory.clone(),
            config,
        );
        (changefeed, directory)
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    // =========================================================================
    // Mutation intake
    // =========================================================================

    /// Record a change made by a collaborator
    ///
    /// The append is retried on transient failures; if it still fails the
    /// error is returned and nothing was recorded. Once the event is durable
    /// this call succeeds: notifications that cannot be derived or announced
    /// after retries are parked for [`Changefeed::reconcile`] and the event is
    /// returned with the notifications announced so far.
    ///
    /// Inbox streams and inbox actions are written by the inbox API only.
    pub async fn record_change(
        &self,
        entity_type: &str,
        entity_id: &str,
        action: impl Into<Action>,
        actor_id: &str,
        payload: Value,
    ) -> Result<RecordedChange, ChangefeedError> {
        let stream_key = StreamKey::new(entity_type, entity_id)?;
        if stream_key.is_inbox() {
            return Err(ChangefeedError::InvalidStreamKey(format!(
                "{stream_key} is reserved for inbox events"
            )));
        }
        let action = action.into();
        if action.is_inbox_action() {
            return Err(ChangefeedError::InvalidInput(format!(
                "{action} is reserved for inbox events"
            )));
        }
        let new_event = NewEvent::new(stream_key, action, actor_id, payload);

        let event = self
            .retry
            .retry("append", || self.bus.append(new_event.clone()))
            .await?;

        let mut notifications = vec![];
        if let Err(e) = self.derive(&event, &mut notifications).await {
            error!(
                event_id = %event.id,
                stream = %event.stream_key(),
                sequence = event.sequence,
                error = %e,
                "notification derivation failed, parked for reconciliation"
            );
            self.pending.insert(event.id, event.clone());
        }

        Ok(RecordedChange { event, notifications })
    }

    /// Retry derivation for every parked event
    ///
    /// Returns the number of notifications announced. Events that fail again
    /// stay parked.
    pub async fn reconcile(&self) -> Result<usize, ChangefeedError> {
        let parked: Vec<Event> = self.pending.iter().map(|e| e.value().clone()).collect();
        let mut announced = 0;
        let mut last_error = None;

        for event in parked {
            let mut notifications = vec![];
            let result = self.derive(&event, &mut notifications).await;
            announced += notifications.len();
            match result {
                Ok(()) => {
                    self.pending.remove(&event.id);
                }
                Err(e) => {
                    warn!(event_id = %event.id, error = %e, "reconciliation failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if announced == 0 => Err(e),
            _ => Ok(announced),
        }
    }

    /// Number of events waiting for reconciliation
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Replay stored events of a stream through the deriver
    ///
    /// Safe to run repeatedly: notifications that already exist are skipped,
    /// and ones left unannounced by an earlier failure are announced now.
    pub async fn redrive(
        &self,
        stream_key: &StreamKey,
        from_sequence: i64,
    ) -> Result<RedriveReport, ChangefeedError> {
        let mut report = RedriveReport::default();
        let mut events = self.bus.read(stream_key.clone(), from_sequence);

        while let Some(event) = events.next().await {
            let event = event?;
            report.events_scanned += 1;
            if event.action.is_inbox_action() {
                continue;
            }

            let mut notifications = vec![];
            let result = self.derive(&event, &mut notifications).await;
            report.notifications_created += notifications.len();
            match result {
                Ok(()) => {
                    self.pending.remove(&event.id);
                }
                Err(e) => {
                    self.pending.insert(event.id, event.clone());
                    return Err(e);
                }
            }
        }

        info!(
            stream = %stream_key,
            from_sequence,
            scanned = report.events_scanned,
            created = report.notifications_created,
            "redrive complete"
        );
        Ok(report)
    }

    /// Derive notifications with retries, then announce each on its inbox stream
    ///
    /// Every stored notification of the event whose announcement is still
    /// unclaimed gets announced, including ones inserted by an earlier attempt
    /// that failed part way. Claims are atomic in the store, so concurrent
    /// callers never announce the same notification twice. Announced
    /// notifications are pushed to `announced` even when a later one fails.
    async fn derive(
        &self,
        event: &Event,
        announced: &mut Vec<Notification>,
    ) -> Result<(), ChangefeedError> {
        self.retry
            .retry("derive", || self.deriver.on_event(event))
            .await?;

        let unannounced = self
            .retry
            .retry("unannounced", || async {
                self.store
                    .unannounced(event.id)
                    .await
                    .map_err(ChangefeedError::from)
            })
            .await?;

        for notification in unannounced {
            let payload = serde_json::to_value(&notification)
                .map_err(|e| ChangefeedError::Serialization(e.to_string()))?;

            let claimed = self
                .retry
                .retry("claim announcement", || async {
                    self.store
                        .claim_announcement(notification.id)
                        .await
                        .map_err(ChangefeedError::from)
                })
                .await?;
            if !claimed {
                continue;
            }

            match self
                .announce(
                    &notification.recipient_id,
                    Action::NotificationCreated,
                    &event.actor_id,
                    payload,
                )
                .await
            {
                Ok(_) => announced.push(notification),
                Err(e) if e.is_transient() => {
                    if let Err(release_error) = self.store.release_announcement(notification.id).await {
                        error!(
                            notification_id = %notification.id,
                            error = %release_error,
                            "announcement claim not released"
                        );
                    }
                    return Err(e);
                }
                // Retrying cannot fix it; the notification stays readable in the inbox
                Err(_) => {}
            }
        }
        Ok(())
    }

    /// Append an inbox event
    ///
    /// Failures are logged here. For reads and read-all the inbox state is
    /// already durable in the store, so callers may ignore the error; live
    /// views recover on their next list.
    async fn announce(
        &self,
        recipient_id: &str,
        action: Action,
        actor_id: &str,
        payload: Value,
    ) -> Result<Event, ChangefeedError> {
        let stream_key = StreamKey::inbox(recipient_id).inspect_err(|e| {
            warn!(recipient = %recipient_id, error = %e, "no inbox stream for recipient");
        })?;
        let new_event = NewEvent::new(stream_key, action, actor_id, payload);
        self.retry
            .retry("inbox append", || self.bus.append(new_event.clone()))
            .await
            .inspect_err(|e| {
                warn!(recipient = %recipient_id, action = %new_event.action, error = %e, "inbox event not appended");
            })
    }

    // =========================================================================
    // Live feed
    // =========================================================================

    /// Open a live stream; `None` starts at the current head
    pub async fn open_stream(
        &self,
        session_id: &str,
        stream_key: StreamKey,
        from_sequence: Option<i64>,
    ) -> Result<SubscriptionHandle, ChangefeedError> {
        self.registry.subscribe(session_id, stream_key, from_sequence).await
    }

    /// Lazy catch-up read from `from_sequence` (inclusive)
    pub fn read_stream(
        &self,
        stream_key: StreamKey,
        from_sequence: i64,
    ) -> BoxStream<'static, Result<Event, ChangefeedError>> {
        self.bus.read(stream_key, from_sequence)
    }

    /// Stop every live stream of a session
    pub fn close_session(&self, session_id: &str) -> usize {
        self.registry.unsubscribe_session(session_id)
    }

    // =========================================================================
    // Inbox
    // =========================================================================

    /// A recipient's notifications, newest first
    pub async fn list_notifications(
        &self,
        recipient_id: &str,
        options: &ListOptions,
    ) -> Result<Vec<Notification>, ChangefeedError> {
        Ok(self.store.list(recipient_id, options).await?)
    }

    pub async fn get_notification(&self, id: Uuid) -> Result<Notification, ChangefeedError> {
        Ok(self.store.get(id).await?)
    }

    pub async fn unread_count(&self, recipient_id: &str) -> Result<u64, ChangefeedError> {
        Ok(self.store.unread_count(recipient_id).await?)
    }

    /// Mark one notification read; already-read is a no-op
    pub async fn mark_read(&self, id: Uuid) -> Result<Notification, ChangefeedError> {
        let outcome = self
            .retry
            .retry("mark_read", || async {
                self.store.mark_read(id).await.map_err(ChangefeedError::from)
            })
            .await?;

        if outcome.changed {
            let recipient = outcome.notification.recipient_id.clone();
            self.announce(
                &recipient,
                Action::NotificationRead,
                &recipient,
                json!({ "notification_id": id }),
            )
            .await
            .ok();
        }
        Ok(outcome.notification)
    }

    /// Mark every unread notification of the recipient read
    ///
    /// Returns the number changed. Notifications arriving concurrently stay
    /// unread.
    pub async fn mark_all_read(&self, recipient_id: &str) -> Result<u64, ChangefeedError> {
        let changed = self
            .retry
            .retry("mark_all_read", || async {
                self.store
                    .mark_all_read(recipient_id)
                    .await
                    .map_err(ChangefeedError::from)
            })
            .await?;

        if changed > 0 {
            self.announce(
                recipient_id,
                Action::NotificationsReadAll,
                recipient_id,
                json!({ "count": changed }),
            )
            .await
            .ok();
        }
        Ok(changed)
    }

    /// Soft-archive a notification
    pub async fn archive(&self, id: Uuid) -> Result<Notification, ChangefeedError> {
        self.retry
            .retry("archive", || async {
                self.store.archive(id).await.map_err(ChangefeedError::from)
            })
            .await
    }
}
