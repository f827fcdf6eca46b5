//! Event Bus
//!
//! The only way events enter the system. Appends go to the durable log
//! first; once an event is durable it is pushed to live subscribers.

use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use tracing::debug;

use crate::config::ChangefeedConfig;
use crate::error::ChangefeedError;
use crate::event::{Event, NewEvent, StreamKey};
use crate::persistence::EventLog;
use crate::registry::SubscriptionRegistry;

/// Ordered, durable change feed
#[derive(Clone)]
pub struct EventBus {
    log: Arc<dyn EventLog>,
    registry: SubscriptionRegistry,
    read_batch_size: usize,
}

impl EventBus {
    pub fn new(log: Arc<dyn EventLog>, registry: SubscriptionRegistry, config: &ChangefeedConfig) -> Self {
        Self {
            log,
            registry,
            read_batch_size: config.read_batch_size.max(1),
        }
    }

    /// Append an event and push it to live subscribers
    ///
    /// Fails with [`ChangefeedError::StorageUnavailable`] when the log cannot
    /// be written; nothing is published in that case. Callers own the retry.
    pub async fn append(&self, event: NewEvent) -> Result<Event, ChangefeedError> {
        let event = self.log.append(event).await?;
        debug!(
            stream = %event.stream_key(),
            sequence = event.sequence,
            action = %event.action,
            "event appended"
        );
        self.registry.publish(&event);
        Ok(event)
    }

    /// Lazily read a stream from `from_sequence` (inclusive) to its current tail
    ///
    /// Pages through the log in batches; the stream ends at the first short
    /// page. A failed page read yields the error and ends the stream, so
    /// callers restart from the sequence after the last event they saw.
    pub fn read(&self, stream_key: StreamKey, from_sequence: i64) -> BoxStream<'static, Result<Event, ChangefeedError>> {
        struct Cursor {
            log: Arc<dyn EventLog>,
            stream_key: StreamKey,
            next: i64,
            batch: usize,
            done: bool,
        }

        let cursor = Cursor {
            log: self.log.clone(),
            stream_key,
            next: from_sequence.max(1),
            batch: self.read_batch_size,
            done: false,
        };

        stream::unfold(cursor, |mut cursor| async move {
            if cursor.done {
                return None;
            }
            match cursor.log.read(&cursor.stream_key, cursor.next, cursor.batch).await {
                Ok(events) => {
                    if events.len() < cursor.batch {
                        cursor.done = true;
                    }
                    if let Some(last) = events.last() {
                        cursor.next = last.sequence + 1;
                    }
                    let page: Vec<Result<Event, ChangefeedError>> = events.into_iter().map(Ok).collect();
                    Some((stream::iter(page), cursor))
                }
                Err(e) => {
                    cursor.done = true;
                    Some((stream::iter(vec![Err(e.into())]), cursor))
                }
            }
        })
        .flatten()
        .boxed()
    }

    /// Read one page; used by paged HTTP reads
    pub async fn read_page(
        &self,
        stream_key: &StreamKey,
        from_sequence: i64,
        limit: usize,
    ) -> Result<Vec<Event>, ChangefeedError> {
        Ok(self.log.read(stream_key, from_sequence.max(1), limit).await?)
    }

    /// Highest sequence assigned in the stream (0 if none)
    pub async fn head_sequence(&self, stream_key: &StreamKey) -> Result<i64, ChangefeedError> {
        Ok(self.log.head_sequence(stream_key).await?)
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Action;
    use crate::persistence::InMemoryEventLog;
    use futures::TryStreamExt;
    use serde_json::json;

    fn bus(batch: usize) -> (Arc<InMemoryEventLog>, EventBus) {
        let log = Arc::new(InMemoryEventLog::new());
        let config = ChangefeedConfig::default().with_read_batch_size(batch);
        let registry = SubscriptionRegistry::new(log.clone(), &config);
        (log.clone(), EventBus::new(log, registry, &config))
    }

    fn change(stream: &StreamKey, n: i64) -> NewEvent {
        NewEvent::new(stream.clone(), Action::CommentAdded, "u2", json!({ "n": n }))
    }

    #[tokio::test]
    async fn test_append_assigns_gapless_sequences_per_stream() {
        let (_, bus) = bus(100);
        let a = StreamKey::repository("1").unwrap();
        let b = StreamKey::repository("2").unwrap();

        assert_eq!(bus.append(change(&a, 0)).await.unwrap().sequence, 1);
        assert_eq!(bus.append(change(&a, 1)).await.unwrap().sequence, 2);
        assert_eq!(bus.append(change(&b, 0)).await.unwrap().sequence, 1);
        assert_eq!(bus.head_sequence(&a).await.unwrap(), 2);
        assert_eq!(bus.head_sequence(&StreamKey::repository("none").unwrap()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_read_pages_through_the_whole_stream() {
        let (_, bus) = bus(3);
        let stream = StreamKey::global("messages").unwrap();
        let mut appended = vec![];
        for n in 0..10 {
            appended.push(bus.append(change(&stream, n)).await.unwrap());
        }

        let read: Vec<Event> = bus.read(stream.clone(), 0).try_collect().await.unwrap();
        assert_eq!(read, appended);

        let tail: Vec<Event> = bus.read(stream, 8).try_collect().await.unwrap();
        let sequences: Vec<i64> = tail.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![8, 9, 10]);
    }

    #[tokio::test]
    async fn test_read_unknown_stream_is_empty() {
        let (_, bus) = bus(100);
        let read: Vec<Event> = bus
            .read(StreamKey::repository("missing").unwrap(), 1)
            .try_collect()
            .await
            .unwrap();
        assert!(read.is_empty());
    }

    #[tokio::test]
    async fn test_append_fails_when_log_unavailable() {
        let (log, bus) = bus(100);
        let stream = StreamKey::repository("42").unwrap();
        let mut handle = bus.registry().subscribe("s1", stream.clone(), None).await.unwrap();

        log.set_unavailable(true);
        let err = bus.append(change(&stream, 0)).await.unwrap_err();
        assert!(matches!(err, ChangefeedError::StorageUnavailable(_)));

        let read: Result<Vec<Event>, _> = bus.read(stream.clone(), 1).try_collect().await;
        assert!(read.is_err());

        log.set_unavailable(false);
        let event = bus.append(change(&stream, 1)).await.unwrap();
        assert_eq!(event.sequence, 1);
        assert_eq!(handle.next().await.unwrap().unwrap(), event);
    }
}
