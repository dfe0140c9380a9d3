/// Integration tests: drive a VenueChatSession through the scripted backend
/// the way the UI layer and the poller would.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::{Value, json};

use venuechat_core::{
    BackendError, ChatEntry, ChatTimestampFormatter, CollectingReporter, ManualClock, ParseError,
    PollStatus, ReportEvent, ScriptedBackend, SessionError, SessionEvent, VenueChatSession,
};

const VENUE: i64 = 12;

fn now() -> DateTime<Utc> {
    "2012-05-16T12:00:00Z".parse().unwrap()
}

fn chat(id: i64, author: i64, created_at: &str) -> Value {
    json!({
        "id": id,
        "venue_id": VENUE,
        "author_id": author,
        "body": format!("message {id}"),
        "created_at": created_at,
        "type": "chat"
    })
}

fn msg(id: i64) -> Value {
    chat(id, id % 4, "2012-05-16 11:00:00")
}

struct Harness {
    backend: Arc<ScriptedBackend>,
    reporter: Arc<CollectingReporter>,
    clock: Arc<ManualClock>,
    session: VenueChatSession,
}

fn harness() -> Harness {
    let backend = Arc::new(ScriptedBackend::new());
    let reporter = Arc::new(CollectingReporter::new());
    let clock = Arc::new(ManualClock::new(now()));
    let session = VenueChatSession::builder(VENUE, backend.clone())
        .clock(clock.clone())
        .reporter(reporter.clone())
        .build()
        .unwrap();
    Harness {
        backend,
        reporter,
        clock,
        session,
    }
}

fn ids(entries: &[ChatEntry]) -> Vec<i64> {
    entries.iter().map(ChatEntry::id).collect()
}

#[tokio::test]
async fn out_of_order_records_land_in_id_order() {
    let h = harness();
    h.backend.push_fetch(Ok(vec![msg(3), msg(1), msg(2)]));

    let outcome = h.session.poll().await.unwrap();

    assert!(outcome.authenticated());
    assert_eq!(ids(&outcome.new_entries), vec![1, 2, 3]);
    assert_eq!(ids(&h.session.entries()), vec![1, 2, 3]);
    assert_eq!(h.session.last_seen_id(), 3);
}

#[tokio::test]
async fn repeated_polls_never_duplicate_and_cursor_tracks_max() {
    let h = harness();
    let batches: Vec<Vec<i64>> = vec![vec![1, 2], vec![2, 3], vec![1, 2, 3], vec![5, 4, 5], vec![], vec![6]];
    for batch in &batches {
        h.backend.push_fetch(Ok(batch.iter().map(|id| msg(*id)).collect()));
    }

    for _ in &batches {
        h.session.poll().await.unwrap();

        let entries = h.session.entries();
        let unique: HashSet<i64> = entries.iter().map(ChatEntry::id).collect();
        assert_eq!(unique.len(), entries.len());
        assert_eq!(Some(h.session.last_seen_id()), entries.iter().map(ChatEntry::id).max());
    }

    assert_eq!(ids(&h.session.entries()), vec![1, 2, 3, 4, 5, 6]);
    let cursors: Vec<i64> = h.backend.fetch_calls().into_iter().map(|(_, since)| since).collect();
    assert_eq!(cursors, vec![0, 2, 3, 3, 5, 5]);
}

#[tokio::test]
async fn replaying_a_response_is_idempotent() {
    let h = harness();
    let response = vec![msg(1), msg(2), msg(3)];
    h.backend.push_fetch(Ok(response.clone()));
    h.backend.push_fetch(Ok(response));

    h.session.poll().await.unwrap();
    let before = h.session.entries();

    let replay = h.session.poll().await.unwrap();
    assert!(replay.new_entries.is_empty());
    assert_eq!(h.session.entries(), before);
    assert_eq!(h.session.last_seen_id(), 3);
}

#[tokio::test]
async fn review_missing_recipient_never_enters_log() {
    let h = harness();
    h.backend.push_fetch(Ok(vec![
        msg(1),
        json!({
            "id": 2,
            "venue_id": VENUE,
            "author_id": 5,
            "body": "best barista in town",
            "created_at": "2012-05-16 11:00:00",
            "type": "review",
            "review_id": 19
        }),
    ]));

    let outcome = h.session.poll().await.unwrap();

    assert_eq!(ids(&outcome.new_entries), vec![1]);
    assert!(h.session.entry(2).is_none());
    assert_eq!(
        h.reporter.events(),
        vec![ReportEvent::RecordRejected {
            entry_id: Some(2),
            error: ParseError::missing("recipient_id"),
        }]
    );
}

#[tokio::test]
async fn unparsable_timestamp_is_retried_for_three_polls_then_dropped() {
    let h = harness();
    h.backend.push_fetch(Ok(vec![chat(7, 1, "16/05/2012 11:00"), msg(8)]));

    for _ in 0..3 {
        h.session.poll().await.unwrap();
        assert!(h.session.entry(7).is_none());
    }

    assert_eq!(h.session.purgatory_len(), 0);
    assert_eq!(ids(&h.session.entries()), vec![8]);

    let events = h.reporter.events();
    assert!(matches!(events[0], ReportEvent::ParkedInPurgatory { entry_id: 7, .. }));
    assert_eq!(
        events.last(),
        Some(&ReportEvent::PurgatoryExhausted {
            entry_id: 7,
            attempts: 3,
            error: ParseError::InvalidTimestamp {
                value: "16/05/2012 11:00".into()
            },
        })
    );

    // A fourth poll has nothing left to retry.
    h.session.poll().await.unwrap();
    assert_eq!(h.reporter.events().len(), events.len());
}

#[tokio::test]
async fn active_chatters_follow_the_clock() {
    let h = harness();
    h.backend.push_fetch(Ok(vec![
        chat(1, 1, "2012-05-09 12:00:01"),
        chat(2, 2, "2012-05-09 11:59:59"),
        chat(3, 3, "2012-05-16 11:59:00"),
    ]));

    h.session.poll().await.unwrap();
    assert_eq!(h.session.active_chatter_count(), 2);

    // Recomputed on the next merge, even an empty one.
    h.clock.advance(Duration::seconds(2));
    h.session.poll().await.unwrap();
    assert_eq!(h.session.active_chatter_count(), 1);
}

#[tokio::test]
async fn second_poll_while_one_is_in_flight_is_coalesced() {
    let h = harness();
    h.backend.push_fetch(Ok(vec![msg(1)]));
    let gate = h.backend.hold_next_fetch();

    let first = {
        let session = h.session.clone();
        tokio::spawn(async move { session.poll().await })
    };
    h.backend.fetch_started().await;

    let second = h.session.poll().await.unwrap();
    assert_eq!(second.status, PollStatus::Coalesced);
    assert!(second.new_entries.is_empty());

    gate.notify_one();
    let first = first.await.unwrap().unwrap();
    assert_eq!(ids(&first.new_entries), vec![1]);
    assert_eq!(h.backend.fetch_calls().len(), 1);
    assert!(h.reporter.events().contains(&ReportEvent::PollCoalesced));

    // The flag is released once the first poll finishes.
    let third = h.session.poll().await.unwrap();
    assert_eq!(third.status, PollStatus::Merged);
}

#[tokio::test]
async fn close_during_fetch_discards_the_response() {
    let h = harness();
    h.backend.push_fetch(Ok(vec![msg(1), msg(2)]));
    let gate = h.backend.hold_next_fetch();

    let poll = {
        let session = h.session.clone();
        tokio::spawn(async move { session.poll().await })
    };
    h.backend.fetch_started().await;

    h.session.close();
    gate.notify_one();

    assert_eq!(poll.await.unwrap(), Err(SessionError::Closed));
    assert!(h.session.entries().is_empty());
    assert_eq!(h.session.last_seen_id(), 0);
    assert!(!h.session.has_loaded());
}

#[tokio::test]
async fn pending_timestamp_covers_the_submit_round_trip() {
    let h = harness();
    h.backend.push_submit(Ok(vec![chat(4, 9, "2012-05-16 12:00:00")]));
    let gate = h.backend.hold_next_submit();

    let submit = {
        let session = h.session.clone();
        tokio::spawn(async move { session.submit("be right there", "chat").await })
    };
    h.backend.submit_started().await;

    assert_eq!(h.session.pending_timestamp(), Some(now()));
    assert!(h.session.entries().is_empty());

    gate.notify_one();
    let appended = submit.await.unwrap().unwrap();
    assert_eq!(ids(&appended), vec![4]);
    assert!(h.session.pending_timestamp().is_none());
    assert_eq!(h.session.last_seen_id(), 4);
}

#[tokio::test]
async fn close_during_submit_discards_the_confirmation() {
    let h = harness();
    h.backend.push_submit(Ok(vec![chat(4, 9, "2012-05-16 12:00:00")]));
    let gate = h.backend.hold_next_submit();

    let submit = {
        let session = h.session.clone();
        tokio::spawn(async move { session.submit("leaving now", "chat").await })
    };
    h.backend.submit_started().await;
    assert!(h.session.pending_timestamp().is_some());

    h.session.close();
    gate.notify_one();

    assert_eq!(submit.await.unwrap(), Err(SessionError::Closed));
    assert!(h.session.entries().is_empty());
    assert_eq!(h.session.last_seen_id(), 0);
    assert!(h.session.pending_timestamp().is_none());
    assert!(h
        .reporter
        .events()
        .contains(&ReportEvent::CompletedAfterClose { operation: "submit" }));
}

#[tokio::test]
async fn pending_timestamp_stays_while_another_submit_is_outstanding() {
    let h = harness();
    // The held submit pops its answer last, so it gets the second one.
    h.backend.push_submit(Ok(vec![chat(4, 9, "2012-05-16 12:00:00")]));
    h.backend.push_submit(Ok(vec![chat(5, 9, "2012-05-16 12:00:00")]));
    let gate = h.backend.hold_next_submit();

    let slow = {
        let session = h.session.clone();
        tokio::spawn(async move { session.submit("first", "chat").await })
    };
    h.backend.submit_started().await;

    let fast = h.session.submit("second", "chat").await.unwrap();
    assert_eq!(ids(&fast), vec![4]);
    assert_eq!(ids(&h.session.entries()), vec![4]);
    assert_eq!(h.session.pending_timestamp(), Some(now()));

    gate.notify_one();
    assert_eq!(ids(&slow.await.unwrap().unwrap()), vec![5]);
    assert_eq!(ids(&h.session.entries()), vec![4, 5]);
    assert!(h.session.pending_timestamp().is_none());
}

#[tokio::test]
async fn unauthenticated_submit_is_reported_without_merging() {
    let h = harness();
    h.backend.push_submit(Err(BackendError::Unauthenticated));

    let result = h.session.submit("hi", "chat").await;

    assert_eq!(result, Err(SessionError::Unauthenticated));
    assert!(h.session.entries().is_empty());
    assert!(h.session.pending_timestamp().is_none());
    assert_eq!(
        h.reporter.events(),
        vec![ReportEvent::Unauthenticated { operation: "submit" }]
    );
}

#[tokio::test]
async fn submit_catch_up_and_concurrent_poll_do_not_double_merge() {
    let h = harness();
    // The poll is held open while the submit answers with the catch-up
    // batch plus the confirmed record; the poll then answers with an
    // overlapping batch.
    h.backend.push_fetch(Ok(vec![msg(1), msg(2)]));
    h.backend.push_submit(Ok(vec![msg(1), msg(2), msg(3)]));
    let gate = h.backend.hold_next_fetch();

    let poll = {
        let session = h.session.clone();
        tokio::spawn(async move { session.poll().await })
    };
    h.backend.fetch_started().await;

    let submitted = h.session.submit("third", "chat").await.unwrap();
    assert_eq!(ids(&submitted), vec![1, 2, 3]);

    gate.notify_one();
    let polled = poll.await.unwrap().unwrap();
    assert!(polled.new_entries.is_empty());

    assert_eq!(ids(&h.session.entries()), vec![1, 2, 3]);
    assert_eq!(h.session.last_seen_id(), 3);
    // The poll still counts as the first load.
    assert!(h.session.has_loaded());
}

#[tokio::test]
async fn subscribers_see_loads_appends_and_close() {
    let h = harness();
    h.backend.push_fetch(Ok(vec![msg(2), msg(1)]));
    let mut events = h.session.subscribe();

    h.session.poll().await.unwrap();
    h.session.close();

    match events.recv().await.unwrap() {
        SessionEvent::EntriesAppended {
            venue_id,
            entries,
            last_seen_id,
            ..
        } => {
            assert_eq!(venue_id, VENUE);
            assert_eq!(ids(&entries), vec![1, 2]);
            assert_eq!(last_seen_id, 2);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(matches!(events.recv().await.unwrap(), SessionEvent::Loaded { venue_id: VENUE }));
    assert!(matches!(events.recv().await.unwrap(), SessionEvent::Closed { venue_id: VENUE }));
}

#[tokio::test]
async fn wire_offset_from_config_applies_to_entries() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.push_fetch(Ok(vec![chat(1, 1, "2012-05-16 04:00:00")]));
    let config = venuechat_core::ChatConfig {
        wire_utc_offset_minutes: -7 * 60,
        ..Default::default()
    };
    let session = VenueChatSession::builder(VENUE, backend)
        .config(config)
        .build()
        .unwrap();

    session.poll().await.unwrap();

    let entry = session.entry(1).unwrap();
    assert_eq!(entry.created_at(), "2012-05-16T11:00:00Z".parse::<DateTime<Utc>>().unwrap());
    assert_eq!(session.formatter().format(entry.created_at()), "2012-05-16 04:00:00");
    assert_eq!(
        ChatTimestampFormatter::utc().format(entry.created_at()),
        "2012-05-16 11:00:00"
    );
}

#[tokio::test]
async fn oversized_active_window_is_clamped_instead_of_overflowing() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.push_fetch(Ok(vec![
        chat(1, 1, "2012-05-16 11:00:00"),
        chat(2, 2, "2003-01-01 00:00:00"),
    ]));
    let config = venuechat_core::ChatConfig {
        active_window_days: 100_000_000,
        ..Default::default()
    };
    let session = VenueChatSession::builder(VENUE, backend)
        .config(config)
        .clock(Arc::new(ManualClock::new(now())))
        .build()
        .unwrap();

    let outcome = session.poll().await.unwrap();

    assert_eq!(ids(&outcome.new_entries), vec![1, 2]);
    assert_eq!(session.active_chatter_count(), 2);
}
