//! End-to-end scenarios against the in-memory stores
//!
//! Run with: cargo test -p changefeed-core --test changefeed_scenarios

use std::sync::Arc;
use std::time::Duration;

use futures::TryStreamExt;
use serde_json::json;

use changefeed_core::prelude::*;

fn owned_repository(directory: &InMemoryDirectory, id: &str, owner: &str) {
    directory.put_repository(RepositoryRecord {
        id: id.into(),
        owner_id: owner.into(),
        name: format!("repo-{id}"),
    });
}

async fn next_event(handle: &mut SubscriptionHandle) -> Event {
    tokio::time::timeout(Duration::from_secs(2), handle.next())
        .await
        .expect("timed out waiting for event")
        .expect("stream ended")
        .expect("delivery failed")
}

// ============================================
// Ordering
// ============================================

#[test_log::test(tokio::test)]
async fn test_append_then_read_returns_identical_events() {
    let (changefeed, _) = Changefeed::in_memory(ChangefeedConfig::default());

    let mut appended = vec![];
    for n in 0..7 {
        let recorded = changefeed
            .record_change("global", "messages", Action::Custom("typing".into()), "u1", json!({ "n": n }))
            .await
            .unwrap();
        appended.push(recorded.event);
    }

    let read: Vec<Event> = changefeed
        .read_stream(StreamKey::global("messages").unwrap(), 0)
        .try_collect()
        .await
        .unwrap();
    assert_eq!(read, appended);
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_concurrent_actors_are_delivered_in_sequence_order() {
    let (changefeed, directory) = Changefeed::in_memory(ChangefeedConfig::default());
    owned_repository(&directory, "42", "u1");
    let changefeed = Arc::new(changefeed);
    let stream = StreamKey::repository("42").unwrap();

    for _ in 0..5 {
        changefeed
            .record_change("repository", "42", Action::FileCreated, "u1", json!({}))
            .await
            .unwrap();
    }

    let mut handle = changefeed
        .open_stream("viewer", stream.clone(), Some(6))
        .await
        .unwrap();

    let mut writers = vec![];
    for (actor, count) in [("u2", 2), ("u3", 1)] {
        let changefeed = changefeed.clone();
        writers.push(tokio::spawn(async move {
            for _ in 0..count {
                changefeed
                    .record_change("repository", "42", Action::CommentAdded, actor, json!({}))
                    .await
                    .unwrap();
            }
        }));
    }
    for writer in writers {
        writer.await.unwrap();
    }

    let delivered: Vec<i64> = vec![
        next_event(&mut handle).await.sequence,
        next_event(&mut handle).await.sequence,
        next_event(&mut handle).await.sequence,
    ];
    assert_eq!(delivered, vec![6, 7, 8]);
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_every_subscriber_sees_gapless_sequences_under_load() {
    let (changefeed, _) = Changefeed::in_memory(ChangefeedConfig::default());
    let changefeed = Arc::new(changefeed);
    let stream = StreamKey::global("messages").unwrap();

    let mut subscribers = vec![];
    for i in 0..3 {
        subscribers.push(
            changefeed
                .open_stream(&format!("s{i}"), stream.clone(), Some(1))
                .await
                .unwrap(),
        );
    }

    let mut writers = vec![];
    for w in 0..8 {
        let changefeed = changefeed.clone();
        writers.push(tokio::spawn(async move {
            for _ in 0..25 {
                changefeed
                    .record_change("global", "messages", Action::Custom("ping".into()), &format!("u{w}"), json!({}))
                    .await
                    .unwrap();
            }
        }));
    }
    for writer in writers {
        writer.await.unwrap();
    }

    for mut handle in subscribers {
        for expected in 1..=200 {
            assert_eq!(next_event(&mut handle).await.sequence, expected);
        }
    }
}

// ============================================
// Notifications
// ============================================

#[test_log::test(tokio::test)]
async fn test_comment_by_other_user_notifies_owner_once() {
    let (changefeed, directory) = Changefeed::in_memory(ChangefeedConfig::default());
    owned_repository(&directory, "42", "u1");

    changefeed
        .record_change("repository", "42", Action::CommentAdded, "u2", json!({"content": "nice"}))
        .await
        .unwrap();

    let inbox = changefeed
        .list_notifications("u1", &ListOptions::default())
        .await
        .unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].notification_type, NotificationType::CommentAdded);
    assert!(!inbox[0].read);

    let actor_inbox = changefeed
        .list_notifications("u2", &ListOptions::default())
        .await
        .unwrap();
    assert!(actor_inbox.is_empty());
}

#[test_log::test(tokio::test)]
async fn test_owner_commenting_on_own_repository_creates_nothing() {
    let (changefeed, directory) = Changefeed::in_memory(ChangefeedConfig::default());
    owned_repository(&directory, "42", "u1");

    let recorded = changefeed
        .record_change("repository", "42", Action::CommentAdded, "u1", json!({}))
        .await
        .unwrap();
    assert!(recorded.notifications.is_empty());
    assert_eq!(changefeed.unread_count("u1").await.unwrap(), 0);
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_repeated_derivation_creates_exactly_one_notification() {
    let store = Arc::new(InMemoryNotificationStore::new());
    let directory = Arc::new(InMemoryDirectory::new());
    owned_repository(&directory, "42", "u1");
    let deriver = Arc::new(NotificationDeriver::new(store.clone(), directory));

    let event = InMemoryEventLog::new()
        .append(NewEvent::new(
            StreamKey::repository("42").unwrap(),
            Action::RepositoryStarred,
            "u2",
            json!({}),
        ))
        .await
        .unwrap();

    let mut tasks = vec![];
    for _ in 0..10 {
        let deriver = deriver.clone();
        let event = event.clone();
        tasks.push(tokio::spawn(async move { deriver.on_event(&event).await.unwrap().len() }));
    }
    let mut created = 0;
    for task in tasks {
        created += task.await.unwrap();
    }

    assert_eq!(created, 1);
    assert_eq!(store.notification_count(), 1);
    assert_eq!(store.unread_count("u1").await.unwrap(), 1);
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_mark_all_read_leaves_concurrent_arrivals_unread() {
    let (changefeed, directory) = Changefeed::in_memory(ChangefeedConfig::default());
    owned_repository(&directory, "42", "u1");
    let changefeed = Arc::new(changefeed);

    for _ in 0..20 {
        changefeed
            .record_change("repository", "42", Action::CommentAdded, "u2", json!({}))
            .await
            .unwrap();
    }

    let arriving = {
        let changefeed = changefeed.clone();
        tokio::spawn(async move {
            changefeed
                .record_change("repository", "42", Action::RepositoryStarred, "u3", json!({}))
                .await
                .unwrap()
        })
    };
    let marked = changefeed.mark_all_read("u1").await.unwrap();
    let arrived = arriving.await.unwrap();

    let star_id = arrived.notifications[0].id;
    let star = changefeed.get_notification(star_id).await.unwrap();

    // Either the bulk mark saw the star (21 changed) or it did not (20 changed
    // and the star stays unread); never a star marked read without being counted
    if marked == 20 {
        assert!(!star.read);
        assert_eq!(changefeed.unread_count("u1").await.unwrap(), 1);
    } else {
        assert_eq!(marked, 21);
        assert!(star.read);
    }
}

#[test_log::test(tokio::test)]
async fn test_notification_inserted_after_bulk_mark_is_unread() {
    let (changefeed, directory) = Changefeed::in_memory(ChangefeedConfig::default());
    owned_repository(&directory, "42", "u1");

    changefeed
        .record_change("repository", "42", Action::CommentAdded, "u2", json!({}))
        .await
        .unwrap();
    assert_eq!(changefeed.mark_all_read("u1").await.unwrap(), 1);

    changefeed
        .record_change("repository", "42", Action::PrOpened, "u2", json!({"title": "Fix"}))
        .await
        .unwrap();

    let unread = changefeed
        .list_notifications("u1", &ListOptions::unread())
        .await
        .unwrap();
    assert_eq!(unread.len(), 1);
    assert_eq!(unread[0].notification_type, NotificationType::PrCreated);
}

// ============================================
// Backlog and reconnect
// ============================================

#[test_log::test(tokio::test)]
async fn test_reconnect_after_backlog_overflow_has_no_gaps_or_duplicates() {
    let config = ChangefeedConfig::default().with_read_batch_size(50);
    let (changefeed, _) = Changefeed::in_memory(config);
    let stream = StreamKey::global("messages").unwrap();

    let mut handle = changefeed
        .open_stream("laptop", stream.clone(), None)
        .await
        .unwrap();

    // Deliver a few events live, then stop reading while 600 more arrive
    for _ in 0..3 {
        changefeed
            .record_change("global", "messages", Action::MessageSent, "u2", json!({}))
            .await
            .unwrap();
    }
    let mut seen = vec![];
    for _ in 0..3 {
        seen.push(next_event(&mut handle).await.sequence);
    }

    for _ in 0..600 {
        changefeed
            .record_change("global", "messages", Action::MessageSent, "u2", json!({}))
            .await
            .unwrap();
    }

    // Drain what was queued before the overflow, then the invalidation
    let resume_from = loop {
        match handle.next().await {
            Some(Ok(event)) => seen.push(event.sequence),
            Some(Err(err)) => break err.resume_from().expect("backlog error"),
            None => panic!("stream ended without backlog error"),
        }
    };
    assert!(handle.next().await.is_none());
    assert_eq!(resume_from, *seen.last().unwrap() + 1);

    let mut reconnected = changefeed
        .open_stream("laptop", stream.clone(), Some(resume_from))
        .await
        .unwrap();
    while seen.len() < 603 {
        seen.push(next_event(&mut reconnected).await.sequence);
    }

    assert_eq!(seen, (1..=603).collect::<Vec<_>>());
}

#[test_log::test(tokio::test)]
async fn test_dropped_connection_stops_delivery() {
    let (changefeed, _) = Changefeed::in_memory(ChangefeedConfig::default());
    let stream = StreamKey::repository("42").unwrap();

    let mut handle = changefeed.open_stream("tab", stream.clone(), None).await.unwrap();
    assert_eq!(changefeed.registry().subscriber_count(&stream), 1);

    assert_eq!(changefeed.close_session("tab"), 1);
    changefeed
        .record_change("repository", "42", Action::FileDeleted, "u2", json!({}))
        .await
        .unwrap();

    assert!(handle.next().await.is_none());
    assert_eq!(changefeed.registry().subscriber_count(&stream), 0);

    // The event itself is durable
    let read: Vec<Event> = changefeed.read_stream(stream, 1).try_collect().await.unwrap();
    assert_eq!(read.len(), 1);
}

#[test_log::test(tokio::test)]
async fn test_subscribing_to_unknown_stream_is_empty_not_an_error() {
    let (changefeed, _) = Changefeed::in_memory(ChangefeedConfig::default());
    let stream = StreamKey::repository("never-written").unwrap();

    let mut handle = changefeed.open_stream("s1", stream.clone(), Some(1)).await.unwrap();
    let pending = tokio::time::timeout(Duration::from_millis(50), handle.next()).await;
    assert!(pending.is_err(), "no events expected yet");

    changefeed
        .record_change("repository", "never-written", Action::RepositoryForked, "u2", json!({}))
        .await
        .unwrap();
    assert_eq!(next_event(&mut handle).await.sequence, 1);
}
