//! Subscription Registry
//!
//! Tracks which sessions watch which streams and pushes newly appended
//! events to them.
//!
//! # Delivery model
//!
//! ```text
//!   EventBus::append ──► publish ──► bounded queue ──► SubscriptionHandle::next
//!                                      (per sub)              │
//!                                                             │ gap or fresh subscribe
//!                                                             ▼
//!                                                    EventLog::read (catch-up)
//! ```
//!
//! Every subscription owns a bounded queue, so a slow consumer never blocks
//! the publisher or another subscriber. A push that finds the queue full
//! invalidates that one subscription. The handle tracks the last delivered
//! sequence and only ever hands out `last + 1`: anything lower is a
//! duplicate and is dropped, anything higher means a gap and the handle
//! reads the missing range from the log before going back to the queue.

mod handle;

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::config::ChangefeedConfig;
use crate::error::ChangefeedError;
use crate::event::{Event, StreamKey};
use crate::persistence::EventLog;

pub use handle::SubscriptionHandle;

/// Unique subscription identifier, assigned monotonically by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Snapshot of one live subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub session_id: String,
    pub stream_key: StreamKey,
    pub last_delivered_sequence: i64,
}

pub(crate) const STATE_ACTIVE: u8 = 0;
pub(crate) const STATE_INVALIDATED: u8 = 1;
pub(crate) const STATE_CLOSED: u8 = 2;

/// State shared between the registry entry and its handle
pub(crate) struct SubscriptionShared {
    session_id: String,
    state: AtomicU8,
    last_delivered: AtomicI64,
}

impl SubscriptionShared {
    fn new(session_id: String) -> Self {
        Self {
            session_id,
            state: AtomicU8::new(STATE_ACTIVE),
            last_delivered: AtomicI64::new(0),
        }
    }

    /// Leave the active state; the first transition wins
    fn finish(&self, state: u8) {
        let _ = self.state.compare_exchange(
            STATE_ACTIVE,
            state,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    pub(crate) fn is_invalidated(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STATE_INVALIDATED
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STATE_CLOSED
    }

    pub(crate) fn record_delivered(&self, sequence: i64) {
        self.last_delivered.store(sequence, Ordering::SeqCst);
    }
}

struct Subscriber {
    sender: mpsc::Sender<Event>,
    shared: Arc<SubscriptionShared>,
}

pub(crate) struct RegistryInner {
    pub(crate) log: Arc<dyn EventLog>,
    backlog_limit: usize,
    pub(crate) read_batch_size: usize,
    next_id: AtomicU64,
    streams: DashMap<StreamKey, HashMap<SubscriptionId, Subscriber>>,
    /// Subscription to stream, for removal without a scan
    index: DashMap<SubscriptionId, StreamKey>,
}

impl RegistryInner {
    /// Drop the registry entry, moving the subscription to `state`
    pub(crate) fn remove(&self, id: SubscriptionId, state: u8) {
        let Some((_, stream_key)) = self.index.remove(&id) else {
            return;
        };

        let mut now_empty = false;
        if let Some(mut subscribers) = self.streams.get_mut(&stream_key) {
            if let Some(subscriber) = subscribers.remove(&id) {
                subscriber.shared.finish(state);
            }
            now_empty = subscribers.is_empty();
        }
        if now_empty {
            self.streams.remove_if(&stream_key, |_, subs| subs.is_empty());
        }
    }
}

/// Registry of live subscriptions
///
/// Cheap to clone; clones share the same subscriptions.
///
/// # Example
///
/// ```ignore
/// let registry = SubscriptionRegistry::new(log.clone(), &ChangefeedConfig::default());
/// let mut handle = registry
///     .subscribe("session-1", StreamKey::repository("42")?, Some(1))
///     .await?;
/// while let Some(event) = handle.next().await {
///     let event = event?;
///     println!("{} #{}", event.action, event.sequence);
/// }
/// ```
#[derive(Clone)]
pub struct SubscriptionRegistry {
    inner: Arc<RegistryInner>,
}

impl SubscriptionRegistry {
    pub fn new(log: Arc<dyn EventLog>, config: &ChangefeedConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                log,
                backlog_limit: config.backlog_limit.max(1),
                read_batch_size: config.read_batch_size.max(1),
                next_id: AtomicU64::new(1),
                streams: DashMap::new(),
                index: DashMap::new(),
            }),
        }
    }

    /// Open a live subscription
    ///
    /// With `Some(from)` the handle delivers every event with
    /// `sequence >= from`, history first. With `None` it starts after the
    /// current head of the stream. Subscribing to a stream that has no
    /// events yet is allowed; the stream comes into being on first append.
    pub async fn subscribe(
        &self,
        session_id: impl Into<String>,
        stream_key: StreamKey,
        from_sequence: Option<i64>,
    ) -> Result<SubscriptionHandle, ChangefeedError> {
        let session_id = session_id.into();
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = mpsc::channel(self.inner.backlog_limit);
        let shared = Arc::new(SubscriptionShared::new(session_id.clone()));

        // Register before touching the log: anything appended from here on
        // reaches the queue, anything earlier is found by the catch-up read.
        self.inner.streams.entry(stream_key.clone()).or_default().insert(
            id,
            Subscriber {
                sender,
                shared: shared.clone(),
            },
        );
        self.inner.index.insert(id, stream_key.clone());

        let start = match from_sequence {
            Some(from) => from.max(1),
            None => match self.inner.log.head_sequence(&stream_key).await {
                Ok(head) => head + 1,
                Err(e) => {
                    self.inner.remove(id, STATE_CLOSED);
                    return Err(e.into());
                }
            },
        };
        shared.record_delivered(start - 1);

        debug!(%id, session = %session_id, stream = %stream_key, start, "subscribed");
        Ok(SubscriptionHandle::new(
            id,
            stream_key,
            start - 1,
            // Starting at the head has no history to replay
            from_sequence.is_some(),
            receiver,
            shared,
            self.inner.clone(),
        ))
    }

    /// Stop delivery to a handle
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        drop(handle);
    }

    /// Stop delivery to every subscription of a session (connection dropped)
    ///
    /// Returns the number of subscriptions removed.
    pub fn unsubscribe_session(&self, session_id: &str) -> usize {
        let ids: Vec<SubscriptionId> = self
            .inner
            .streams
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|(_, sub)| sub.shared.session_id == session_id)
                    .map(|(id, _)| *id)
                    .collect::<Vec<_>>()
            })
            .collect();

        for id in &ids {
            self.inner.remove(*id, STATE_CLOSED);
        }
        if !ids.is_empty() {
            debug!(session = %session_id, count = ids.len(), "session unsubscribed");
        }
        ids.len()
    }

    /// Push an appended event to every subscriber of its stream
    ///
    /// Never blocks: a subscriber whose backlog is full is invalidated and
    /// must resubscribe from its last delivered sequence.
    pub fn publish(&self, event: &Event) {
        let stream_key = event.stream_key();
        let mut overflowed = vec![];
        let mut disconnected = vec![];

        if let Some(subscribers) = self.inner.streams.get(&stream_key) {
            for (id, subscriber) in subscribers.iter() {
                match subscriber.sender.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => overflowed.push(*id),
                    Err(TrySendError::Closed(_)) => disconnected.push(*id),
                }
            }
        }

        for id in overflowed {
            warn!(
                %id,
                stream = %stream_key,
                sequence = event.sequence,
                backlog_limit = self.inner.backlog_limit,
                "subscriber backlog exceeded, invalidating subscription"
            );
            self.inner.remove(id, STATE_INVALIDATED);
        }
        for id in disconnected {
            self.inner.remove(id, STATE_CLOSED);
        }
    }

    /// Snapshots of the live subscriptions on a stream
    pub fn subscriptions(&self, stream_key: &StreamKey) -> Vec<Subscription> {
        let mut subscriptions: Vec<Subscription> = self
            .inner
            .streams
            .get(stream_key)
            .map(|subs| {
                subs.iter()
                    .map(|(id, sub)| Subscription {
                        id: *id,
                        session_id: sub.shared.session_id.clone(),
                        stream_key: stream_key.clone(),
                        last_delivered_sequence: sub.shared.last_delivered.load(Ordering::SeqCst),
                    })
                    .collect()
            })
            .unwrap_or_default();
        subscriptions.sort_by_key(|s| s.id);
        subscriptions
    }

    /// Number of live subscriptions on a stream
    pub fn subscriber_count(&self, stream_key: &StreamKey) -> usize {
        self.inner
            .streams
            .get(stream_key)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    /// Number of live subscriptions across all streams
    pub fn total_subscriptions(&self) -> usize {
        self.inner.index.len()
    }
}
