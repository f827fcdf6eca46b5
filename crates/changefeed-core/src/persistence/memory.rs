//! In-memory implementations of EventLog and NotificationStore

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

use super::store::*;
use crate::event::{Event, NewEvent, StreamKey};
use crate::notify::{InsertOutcome, ListOptions, MarkReadOutcome, Notification};

/// In-memory implementation of EventLog
///
/// Each stream has its own lock, so appenders to one stream serialize
/// while appenders to different streams proceed in parallel. Provides the
/// same ordering semantics as the PostgreSQL implementation.
///
/// # Example
///
/// ```
/// use changefeed_core::InMemoryEventLog;
///
/// let log = InMemoryEventLog::new();
/// assert_eq!(log.event_count(), 0);
/// ```
#[derive(Default)]
pub struct InMemoryEventLog {
    streams: DashMap<StreamKey, Arc<Mutex<Vec<Event>>>>,
    unavailable: AtomicBool,
}

impl InMemoryEventLog {
    /// Create a new in-memory log
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a storage outage: every call fails with `Unavailable` while set
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of streams with at least one event
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Total number of events across all streams
    pub fn event_count(&self) -> usize {
        self.streams.iter().map(|s| s.value().lock().len()).sum()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("event log offline".into()));
        }
        Ok(())
    }

    fn stream(&self, stream_key: &StreamKey) -> Option<Arc<Mutex<Vec<Event>>>> {
        self.streams.get(stream_key).map(|s| s.value().clone())
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(&self, event: NewEvent) -> Result<Event, StoreError> {
        self.check_available()?;

        let stream = self
            .streams
            .entry(event.stream_key.clone())
            .or_default()
            .value()
            .clone();

        let mut events = stream.lock();
        let sequence = events.len() as i64 + 1;
        let event = Event::from_new(event, sequence);
        events.push(event.clone());
        Ok(event)
    }

    async fn read(
        &self,
        stream_key: &StreamKey,
        from_sequence: i64,
        limit: usize,
    ) -> Result<Vec<Event>, StoreError> {
        self.check_available()?;

        let Some(stream) = self.stream(stream_key) else {
            return Ok(vec![]);
        };
        let events = stream.lock();
        // Sequence N lives at index N - 1
        let start = (from_sequence.max(1) - 1) as usize;
        Ok(events.iter().skip(start).take(limit).cloned().collect())
    }

    async fn head_sequence(&self, stream_key: &StreamKey) -> Result<i64, StoreError> {
        self.check_available()?;
        Ok(self
            .stream(stream_key)
            .map(|s| s.lock().len() as i64)
            .unwrap_or(0))
    }
}

/// One recipient's inbox
#[derive(Default)]
struct Inbox {
    /// Insertion order, which is also creation order
    notifications: Vec<Notification>,
    source_events: HashSet<Uuid>,
}

impl Inbox {
    fn find_mut(&mut self, id: Uuid) -> Option<&mut Notification> {
        self.notifications.iter_mut().find(|n| n.id == id)
    }
}

/// In-memory implementation of NotificationStore
///
/// Inboxes are partitioned by recipient, each behind its own lock. The
/// de-duplication check and the insert happen under that lock.
#[derive(Default)]
pub struct InMemoryNotificationStore {
    inboxes: DashMap<String, Arc<Mutex<Inbox>>>,
    /// Notification id to recipient
    index: DashMap<Uuid, String>,
    /// Notification id to source event, until the announcement is claimed
    unannounced: DashMap<Uuid, Uuid>,
    unavailable: AtomicBool,
}

impl InMemoryNotificationStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a storage outage: every call fails with `Unavailable` while set
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Total number of stored notifications
    pub fn notification_count(&self) -> usize {
        self.index.len()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("notification store offline".into()));
        }
        Ok(())
    }

    fn inbox(&self, recipient_id: &str) -> Option<Arc<Mutex<Inbox>>> {
        self.inboxes.get(recipient_id).map(|i| i.value().clone())
    }

    fn inbox_of(&self, id: Uuid) -> Result<Arc<Mutex<Inbox>>, StoreError> {
        let recipient = self
            .index
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or(StoreError::NotificationNotFound(id))?;
        self.inbox(&recipient)
            .ok_or(StoreError::NotificationNotFound(id))
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn insert_if_absent(
        &self,
        notification: Notification,
    ) -> Result<InsertOutcome, StoreError> {
        self.check_available()?;

        let inbox = self
            .inboxes
            .entry(notification.recipient_id.clone())
            .or_default()
            .value()
            .clone();

        let mut inbox = inbox.lock();
        if !inbox.source_events.insert(notification.source_event_id) {
            return Ok(InsertOutcome::Duplicate);
        }
        self.index
            .insert(notification.id, notification.recipient_id.clone());
        self.unannounced
            .insert(notification.id, notification.source_event_id);
        inbox.notifications.push(notification.clone());
        Ok(InsertOutcome::Inserted(notification))
    }

    async fn get(&self, id: Uuid) -> Result<Notification, StoreError> {
        self.check_available()?;
        let inbox = self.inbox_of(id)?;
        let inbox = inbox.lock();
        inbox
            .notifications
            .iter()
            .find(|n| n.id == id)
            .cloned()
            .ok_or(StoreError::NotificationNotFound(id))
    }

    async fn list(
        &self,
        recipient_id: &str,
        options: &ListOptions,
    ) -> Result<Vec<Notification>, StoreError> {
        self.check_available()?;

        let Some(inbox) = self.inbox(recipient_id) else {
            return Ok(vec![]);
        };
        let inbox = inbox.lock();
        let limit = options.limit.unwrap_or(usize::MAX);
        Ok(inbox
            .notifications
            .iter()
            .rev()
            .filter(|n| options.matches(n))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_read(&self, id: Uuid) -> Result<MarkReadOutcome, StoreError> {
        self.check_available()?;
        let inbox = self.inbox_of(id)?;
        let mut inbox = inbox.lock();
        let notification = inbox
            .find_mut(id)
            .ok_or(StoreError::NotificationNotFound(id))?;

        let changed = !notification.read;
        notification.read = true;
        Ok(MarkReadOutcome {
            notification: notification.clone(),
            changed,
        })
    }

    async fn mark_all_read(&self, recipient_id: &str) -> Result<u64, StoreError> {
        self.check_available()?;

        let Some(inbox) = self.inbox(recipient_id) else {
            return Ok(0);
        };
        let mut inbox = inbox.lock();
        let mut changed = 0;
        for notification in inbox.notifications.iter_mut().filter(|n| !n.read) {
            notification.read = true;
            changed += 1;
        }
        Ok(changed)
    }

    async fn archive(&self, id: Uuid) -> Result<Notification, StoreError> {
        self.check_available()?;
        let inbox = self.inbox_of(id)?;
        let mut inbox = inbox.lock();
        let notification = inbox
            .find_mut(id)
            .ok_or(StoreError::NotificationNotFound(id))?;

        if notification.archived_at.is_none() {
            notification.archived_at = Some(Utc::now());
        }
        Ok(notification.clone())
    }

    async fn unread_count(&self, recipient_id: &str) -> Result<u64, StoreError> {
        self.check_available()?;
        Ok(self
            .inbox(recipient_id)
            .map(|inbox| {
                inbox
                    .lock()
                    .notifications
                    .iter()
                    .filter(|n| !n.read && !n.is_archived())
                    .count() as u64
            })
            .unwrap_or(0))
    }

    async fn unannounced(&self, source_event_id: Uuid) -> Result<Vec<Notification>, StoreError> {
        self.check_available()?;

        let ids: Vec<Uuid> = self
            .unannounced
            .iter()
            .filter(|entry| *entry.value() == source_event_id)
            .map(|entry| *entry.key())
            .collect();

        let mut notifications = Vec::with_capacity(ids.len());
        for id in ids {
            notifications.push(self.get(id).await?);
        }
        notifications.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(notifications)
    }

    async fn claim_announcement(&self, id: Uuid) -> Result<bool, StoreError> {
        self.check_available()?;
        Ok(self.unannounced.remove(&id).is_some())
    }

    async fn release_announcement(&self, id: Uuid) -> Result<(), StoreError> {
        self.check_available()?;
        let notification = self.get(id).await?;
        self.unannounced.insert(id, notification.source_event_id);
        Ok(())
    }
}
