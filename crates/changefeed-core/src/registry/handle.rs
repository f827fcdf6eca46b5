//! Live subscription handle

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use super::{RegistryInner, SubscriptionId, SubscriptionShared, STATE_CLOSED};
use crate::error::ChangefeedError;
use crate::event::{Event, StreamKey};

/// A live subscription to one stream
///
/// Yields every event of the stream exactly once, in sequence order,
/// starting where the subscription was opened. Dropping the handle
/// unsubscribes.
pub struct SubscriptionHandle {
    id: SubscriptionId,
    stream_key: StreamKey,
    last_delivered: i64,
    /// Read from the log instead of the queue until the log runs dry
    catching_up: bool,
    pending: VecDeque<Event>,
    receiver: mpsc::Receiver<Event>,
    shared: Arc<SubscriptionShared>,
    registry: Arc<RegistryInner>,
    finished: bool,
}

impl SubscriptionHandle {
    pub(crate) fn new(
        id: SubscriptionId,
        stream_key: StreamKey,
        last_delivered: i64,
        catching_up: bool,
        receiver: mpsc::Receiver<Event>,
        shared: Arc<SubscriptionShared>,
        registry: Arc<RegistryInner>,
    ) -> Self {
        Self {
            id,
            stream_key,
            last_delivered,
            catching_up,
            pending: VecDeque::new(),
            receiver,
            shared,
            registry,
            finished: false,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn stream_key(&self) -> &StreamKey {
        &self.stream_key
    }

    /// Highest sequence handed out so far
    pub fn last_delivered_sequence(&self) -> i64 {
        self.last_delivered
    }

    /// Sequence to pass when resubscribing after a disconnect
    pub fn resume_from(&self) -> i64 {
        self.last_delivered + 1
    }

    /// Wait for the next event
    ///
    /// Returns `None` once the subscription is closed. A subscription that
    /// overflowed its backlog first drains what it already queued, then
    /// yields [`ChangefeedError::StreamBacklogExceeded`] once. A failed
    /// catch-up read yields [`ChangefeedError::StorageUnavailable`] and
    /// leaves the handle usable; calling `next` again retries the read.
    pub async fn next(&mut self) -> Option<Result<Event, ChangefeedError>> {
        loop {
            if self.finished || self.shared.is_closed() {
                return None;
            }

            if let Some(event) = self.pending.pop_front() {
                match event.sequence.cmp(&(self.last_delivered + 1)) {
                    Ordering::Less => continue,
                    Ordering::Equal => return Some(Ok(self.deliver(event))),
                    Ordering::Greater => {
                        self.pending.clear();
                        self.catching_up = true;
                        continue;
                    }
                }
            }

            if self.catching_up {
                let batch = self.registry.read_batch_size;
                match self
                    .registry
                    .log
                    .read(&self.stream_key, self.last_delivered + 1, batch)
                    .await
                {
                    Ok(events) => {
                        if events.len() < batch {
                            self.catching_up = false;
                        }
                        self.pending.extend(events);
                    }
                    Err(e) => return Some(Err(e.into())),
                }
                continue;
            }

            match self.receiver.recv().await {
                Some(event) => match event.sequence.cmp(&(self.last_delivered + 1)) {
                    // Already served by a catch-up read
                    Ordering::Less => continue,
                    Ordering::Equal => return Some(Ok(self.deliver(event))),
                    Ordering::Greater => {
                        debug!(
                            id = %self.id,
                            stream = %self.stream_key,
                            expected = self.last_delivered + 1,
                            received = event.sequence,
                            "gap in live delivery, reading from log"
                        );
                        self.catching_up = true;
                    }
                },
                None => {
                    self.finished = true;
                    if self.shared.is_invalidated() {
                        return Some(Err(ChangefeedError::StreamBacklogExceeded {
                            stream_key: self.stream_key.to_string(),
                            last_delivered_sequence: self.last_delivered,
                        }));
                    }
                    return None;
                }
            }
        }
    }

    fn deliver(&mut self, event: Event) -> Event {
        self.last_delivered = event.sequence;
        self.shared.record_delivered(event.sequence);
        event
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.registry.remove(self.id, STATE_CLOSED);
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("stream_key", &self.stream_key)
            .field("last_delivered", &self.last_delivered)
            .field("catching_up", &self.catching_up)
            .finish()
    }
}
