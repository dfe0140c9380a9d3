use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use venuechat_types::api::SubmitChatRequest;
use venuechat_types::models::{EntryId, UserId, VenueId};

use crate::backend::ChatBackend;
use crate::clock::{Clock, SystemClock};
use crate::config::ChatConfig;
use crate::entry::{ChatEntry, PlusOneMetadata};
use crate::error::{BackendError, ConfigError, SessionError};
use crate::events::SessionEvent;
use crate::merge::{ChatLog, MergeOutcome, MergeRules};
use crate::report::{ReportEvent, SessionReport, SessionReporter, TracingReporter};
use crate::timestamp::ChatTimestampFormatter;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// The fetch answered and its records were merged (possibly none).
    Merged,
    /// The server refused the caller; nothing changed.
    Unauthenticated,
    /// Another poll was already in flight; this one did nothing.
    Coalesced,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome {
    pub status: PollStatus,
    /// Entries appended by this poll, ascending by id.
    pub new_entries: Vec<ChatEntry>,
}

impl PollOutcome {
    fn merged(new_entries: Vec<ChatEntry>) -> Self {
        Self {
            status: PollStatus::Merged,
            new_entries,
        }
    }

    fn empty(status: PollStatus) -> Self {
        Self {
            status,
            new_entries: Vec::new(),
        }
    }

    pub fn authenticated(&self) -> bool {
        self.status != PollStatus::Unauthenticated
    }
}

#[derive(Default)]
struct SessionState {
    log: ChatLog,
    has_loaded: bool,
    pending_timestamp: Option<DateTime<Utc>>,
    outstanding_submits: usize,
}

impl SessionState {
    fn end_submit(&mut self) {
        self.outstanding_submits = self.outstanding_submits.saturating_sub(1);
        if self.outstanding_submits == 0 {
            self.pending_timestamp = None;
        }
    }
}

/// Chat state of one venue for as long as its view is active.
///
/// Cheap to clone; clones share the same session. Poll and submit may run
/// concurrently from different tasks. Merges are serialized on the state
/// lock, which is never held across a round trip. At most one poll is in
/// flight at a time; a second one is coalesced. After [`close`] every
/// outstanding operation completes without touching state.
///
/// [`close`]: VenueChatSession::close
#[derive(Clone)]
pub struct VenueChatSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    venue_id: VenueId,
    session_id: Uuid,
    backend: Arc<dyn ChatBackend>,
    config: ChatConfig,
    formatter: ChatTimestampFormatter,
    clock: Arc<dyn Clock>,
    reporter: Arc<dyn SessionReporter>,
    state: Mutex<SessionState>,
    poll_in_flight: AtomicBool,
    closing: AtomicBool,
    cancel: CancellationToken,
    events: broadcast::Sender<SessionEvent>,
}

pub struct SessionBuilder {
    venue_id: VenueId,
    backend: Arc<dyn ChatBackend>,
    config: ChatConfig,
    clock: Arc<dyn Clock>,
    reporter: Arc<dyn SessionReporter>,
}

impl SessionBuilder {
    pub fn config(mut self, config: ChatConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn reporter(mut self, reporter: Arc<dyn SessionReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn build(self) -> Result<VenueChatSession, ConfigError> {
        let formatter = self.config.formatter()?;
        Ok(VenueChatSession::from_parts(
            self.venue_id,
            self.backend,
            self.config,
            formatter,
            self.clock,
            self.reporter,
        ))
    }
}

impl VenueChatSession {
    /// Session with default configuration, the system clock and tracing
    /// reports.
    pub fn new(venue_id: VenueId, backend: Arc<dyn ChatBackend>) -> Self {
        Self::from_parts(
            venue_id,
            backend,
            ChatConfig::default(),
            ChatTimestampFormatter::utc(),
            Arc::new(SystemClock),
            Arc::new(TracingReporter),
        )
    }

    pub fn builder(venue_id: VenueId, backend: Arc<dyn ChatBackend>) -> SessionBuilder {
        SessionBuilder {
            venue_id,
            backend,
            config: ChatConfig::default(),
            clock: Arc::new(SystemClock),
            reporter: Arc::new(TracingReporter),
        }
    }

    fn from_parts(
        venue_id: VenueId,
        backend: Arc<dyn ChatBackend>,
        config: ChatConfig,
        formatter: ChatTimestampFormatter,
        clock: Arc<dyn Clock>,
        reporter: Arc<dyn SessionReporter>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let session_id = Uuid::new_v4();
        info!(venue_id, session_id = %session_id, "venue chat session opened");

        Self {
            inner: Arc::new(SessionInner {
                venue_id,
                session_id,
                backend,
                config,
                formatter,
                clock,
                reporter,
                state: Mutex::new(SessionState::default()),
                poll_in_flight: AtomicBool::new(false),
                closing: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                events,
            }),
        }
    }

    // -- Operations --

    /// Fetch records newer than the cursor and merge them.
    ///
    /// An unauthenticated caller gets a [`PollStatus::Unauthenticated`]
    /// outcome with state untouched. A transport failure means "nothing new
    /// this cycle" and is returned as [`SessionError::Transport`].
    pub async fn poll(&self) -> Result<PollOutcome, SessionError> {
        let inner = &self.inner;
        if inner.cancel.is_cancelled() {
            return Err(SessionError::Closed);
        }
        if inner.poll_in_flight.swap(true, Ordering::AcqRel) {
            self.report(ReportEvent::PollCoalesced);
            return Ok(PollOutcome::empty(PollStatus::Coalesced));
        }
        let _in_flight = InFlight(&inner.poll_in_flight);

        let since = self.lock_state().log.last_seen_id();
        debug!(venue_id = inner.venue_id, since, "polling venue chat");

        let fetched = tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => {
                self.report(ReportEvent::CompletedAfterClose { operation: "poll" });
                return Err(SessionError::Closed);
            }
            result = inner.backend.fetch_chat_entries(inner.venue_id, since) => result,
        };

        let records = match fetched {
            Ok(records) => records,
            Err(BackendError::Unauthenticated) => {
                self.report(ReportEvent::Unauthenticated { operation: "poll" });
                return Ok(PollOutcome::empty(PollStatus::Unauthenticated));
            }
            Err(BackendError::Transport(message)) => {
                self.report(ReportEvent::TransportFailed {
                    operation: "poll",
                    message: message.clone(),
                });
                return Err(SessionError::Transport(message));
            }
        };

        let (outcome, first_load, last_seen_id, active_chatters) = {
            let mut state = self.lock_state();
            if inner.cancel.is_cancelled() {
                drop(state);
                self.report(ReportEvent::CompletedAfterClose { operation: "poll" });
                return Err(SessionError::Closed);
            }
            let outcome = state.log.merge(records, &self.merge_rules(true));
            let first_load = !state.has_loaded;
            state.has_loaded = true;
            (
                outcome,
                first_load,
                state.log.last_seen_id(),
                state.log.active_chatter_count(),
            )
        };

        let appended = self.finish_merge(outcome, last_seen_id, active_chatters);
        if first_load {
            let _ = inner.events.send(SessionEvent::Loaded {
                venue_id: inner.venue_id,
            });
        }

        Ok(PollOutcome::merged(appended))
    }

    /// Post a message and merge the server's answer.
    ///
    /// While the round trip is outstanding [`pending_timestamp`] holds the
    /// local submission instant. On failure nothing is merged and the
    /// failure is returned.
    ///
    /// [`pending_timestamp`]: VenueChatSession::pending_timestamp
    pub async fn submit(
        &self,
        body: impl Into<String>,
        kind: impl Into<String>,
    ) -> Result<Vec<ChatEntry>, SessionError> {
        let inner = &self.inner;
        if inner.cancel.is_cancelled() {
            return Err(SessionError::Closed);
        }

        let since = {
            let mut state = self.lock_state();
            state.pending_timestamp = Some(inner.clock.now());
            state.outstanding_submits += 1;
            state.log.last_seen_id()
        };
        let pending = PendingSubmit::new(inner);

        let request = SubmitChatRequest {
            venue_id: inner.venue_id,
            since_id: since,
            body: body.into(),
            kind: kind.into(),
        };
        debug!(venue_id = inner.venue_id, since, kind = %request.kind, "submitting chat entry");

        let response = tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => {
                self.report(ReportEvent::CompletedAfterClose { operation: "submit" });
                return Err(SessionError::Closed);
            }
            result = inner.backend.submit_chat_entry(request) => result,
        };

        let records = match response {
            Ok(records) => records,
            Err(err) => {
                self.report(match &err {
                    BackendError::Unauthenticated => ReportEvent::Unauthenticated { operation: "submit" },
                    BackendError::Transport(message) => ReportEvent::TransportFailed {
                        operation: "submit",
                        message: message.clone(),
                    },
                });
                return Err(err.into());
            }
        };

        let (outcome, last_seen_id, active_chatters) = {
            let mut state = self.lock_state();
            if inner.cancel.is_cancelled() {
                drop(state);
                self.report(ReportEvent::CompletedAfterClose { operation: "submit" });
                return Err(SessionError::Closed);
            }
            pending.settle(&mut state);
            let outcome = state.log.merge(records, &self.merge_rules(false));
            (outcome, state.log.last_seen_id(), state.log.active_chatter_count())
        };

        Ok(self.finish_merge(outcome, last_seen_id, active_chatters))
    }

    /// Apply an endorsement that arrived outside the poll cycle. Returns
    /// `false` if `entry_id` is not a review entry in the log.
    pub fn apply_plus_one(&self, entry_id: EntryId, actor_id: UserId, metadata: PlusOneMetadata) -> bool {
        let inner = &self.inner;
        {
            let mut state = self.lock_state();
            if inner.cancel.is_cancelled() {
                return false;
            }
            let Some(love) = state.log.entry_mut(entry_id).and_then(ChatEntry::as_love_mut) else {
                debug!(venue_id = inner.venue_id, entry_id, "plus-one for unknown review entry");
                return false;
            };
            love.add_plus_one(actor_id, metadata);
        }

        let _ = inner.events.send(SessionEvent::PlusOneAdded {
            venue_id: inner.venue_id,
            entry_id,
            actor_id,
        });
        true
    }

    /// Tear the session down: pending operations become no-ops, and the
    /// log and purgatory are dropped. Idempotent.
    pub fn close(&self) {
        let inner = &self.inner;
        if inner.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        inner.cancel.cancel();
        *self.lock_state() = SessionState::default();

        info!(venue_id = inner.venue_id, session_id = %inner.session_id, "venue chat session closed");
        let _ = inner.events.send(SessionEvent::Closed {
            venue_id: inner.venue_id,
        });
    }

    /// Resolves once the session is closed.
    pub async fn closed(&self) {
        self.inner.cancel.cancelled().await;
    }

    // -- Accessors --

    pub fn venue_id(&self) -> VenueId {
        self.inner.venue_id
    }

    pub fn session_id(&self) -> Uuid {
        self.inner.session_id
    }

    pub fn config(&self) -> &ChatConfig {
        &self.inner.config
    }

    pub fn formatter(&self) -> &ChatTimestampFormatter {
        &self.inner.formatter
    }

    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn entries(&self) -> Vec<ChatEntry> {
        self.lock_state().log.entries().to_vec()
    }

    pub fn entry(&self, id: EntryId) -> Option<ChatEntry> {
        self.lock_state().log.entry(id).cloned()
    }

    pub fn last_seen_id(&self) -> EntryId {
        self.lock_state().log.last_seen_id()
    }

    pub fn active_chatter_count(&self) -> usize {
        self.lock_state().log.active_chatter_count()
    }

    pub fn purgatory_len(&self) -> usize {
        self.lock_state().log.purgatory_len()
    }

    /// False until the first poll has merged, so an empty log can be told
    /// apart from one that was never fetched.
    pub fn has_loaded(&self) -> bool {
        self.lock_state().has_loaded
    }

    pub fn pending_timestamp(&self) -> Option<DateTime<Utc>> {
        self.lock_state().pending_timestamp
    }

    // -- Internals --

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn merge_rules(&self, retry_purgatory: bool) -> MergeRules {
        MergeRules {
            formatter: self.inner.formatter,
            max_attempts: self.inner.config.purgatory_max_attempts,
            retry_purgatory,
            now: self.inner.clock.now(),
            window: self.inner.config.active_window(),
        }
    }

    fn finish_merge(
        &self,
        outcome: MergeOutcome,
        last_seen_id: EntryId,
        active_chatters: usize,
    ) -> Vec<ChatEntry> {
        for event in outcome.reports {
            self.report(event);
        }

        if !outcome.appended.is_empty() {
            debug!(
                venue_id = self.inner.venue_id,
                appended = outcome.appended.len(),
                last_seen_id,
                active_chatters,
                "merged chat entries"
            );
            let _ = self.inner.events.send(SessionEvent::EntriesAppended {
                venue_id: self.inner.venue_id,
                entries: outcome.appended.clone(),
                last_seen_id,
                active_chatters,
            });
        }

        outcome.appended
    }

    fn report(&self, event: ReportEvent) {
        self.inner.reporter.report(SessionReport {
            venue_id: self.inner.venue_id,
            session_id: self.inner.session_id,
            event,
        });
    }
}

/// Clears the in-flight poll flag however the poll ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Clears the pending timestamp once the last outstanding submit ends,
/// including when the submitting future is dropped mid-flight. A successful
/// submit settles it under the merge lock so the marker and the confirmed
/// entry swap in one step.
struct PendingSubmit<'a> {
    inner: &'a SessionInner,
    settled: bool,
}

impl<'a> PendingSubmit<'a> {
    fn new(inner: &'a SessionInner) -> Self {
        Self {
            inner,
            settled: false,
        }
    }

    fn settle(mut self, state: &mut SessionState) {
        self.settled = true;
        state.end_submit();
    }
}

impl Drop for PendingSubmit<'_> {
    fn drop(&mut self) {
        if self.settled || self.inner.cancel.is_cancelled() {
            return;
        }
        self.inner
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .end_submit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::report::CollectingReporter;
    use crate::scripted::ScriptedBackend;
    use serde_json::{Value, json};

    fn record(id: i64, author: i64) -> Value {
        json!({
            "id": id,
            "venue_id": 12,
            "author_id": author,
            "body": format!("message {id}"),
            "created_at": "2012-05-16 11:00:00",
            "type": "chat"
        })
    }

    fn session(backend: Arc<ScriptedBackend>) -> (VenueChatSession, Arc<CollectingReporter>) {
        let reporter = Arc::new(CollectingReporter::new());
        let clock = Arc::new(ManualClock::new("2012-05-16T12:00:00Z".parse().unwrap()));
        let session = VenueChatSession::builder(12, backend)
            .clock(clock)
            .reporter(reporter.clone())
            .build()
            .unwrap();
        (session, reporter)
    }

    #[tokio::test]
    async fn poll_sends_cursor_and_merges() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_fetch(Ok(vec![record(3, 1), record(1, 2), record(2, 1)]));
        backend.push_fetch(Ok(vec![record(4, 3)]));
        let (session, _) = session(backend.clone());

        assert!(!session.has_loaded());
        let first = session.poll().await.unwrap();
        assert_eq!(first.status, PollStatus::Merged);
        assert_eq!(first.new_entries.iter().map(ChatEntry::id).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(session.has_loaded());
        assert_eq!(session.last_seen_id(), 3);
        assert_eq!(session.active_chatter_count(), 2);

        session.poll().await.unwrap();
        assert_eq!(backend.fetch_calls(), vec![(12, 0), (12, 3)]);
        assert_eq!(session.active_chatter_count(), 3);
    }

    #[tokio::test]
    async fn unauthenticated_poll_changes_nothing() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_fetch(Err(BackendError::Unauthenticated));
        let (session, reporter) = session(backend);

        let outcome = session.poll().await.unwrap();
        assert!(!outcome.authenticated());
        assert!(outcome.new_entries.is_empty());
        assert!(!session.has_loaded());
        assert_eq!(session.last_seen_id(), 0);
        assert_eq!(
            reporter.events(),
            vec![ReportEvent::Unauthenticated { operation: "poll" }]
        );
    }

    #[tokio::test]
    async fn transport_failure_is_reported_and_recoverable() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_fetch(Err(BackendError::Transport("timed out".into())));
        backend.push_fetch(Ok(vec![record(1, 1)]));
        let (session, _) = session(backend);

        assert_eq!(
            session.poll().await,
            Err(SessionError::Transport("timed out".into()))
        );
        assert!(!session.has_loaded());

        let outcome = session.poll().await.unwrap();
        assert_eq!(outcome.new_entries.len(), 1);
        assert!(session.has_loaded());
    }

    #[tokio::test]
    async fn submit_merges_confirmation_and_clears_pending() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_submit(Ok(vec![record(8, 5)]));
        let (session, _) = session(backend.clone());

        let appended = session.submit("on my way", "chat").await.unwrap();
        assert_eq!(appended.iter().map(ChatEntry::id).collect::<Vec<_>>(), vec![8]);
        assert_eq!(session.last_seen_id(), 8);
        assert!(session.pending_timestamp().is_none());

        let calls = backend.submit_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].venue_id, 12);
        assert_eq!(calls[0].since_id, 0);
        assert_eq!(calls[0].body, "on my way");
        assert_eq!(calls[0].kind, "chat");
    }

    #[tokio::test]
    async fn failed_submit_leaves_log_alone() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_fetch(Ok(vec![record(1, 1)]));
        backend.push_submit(Err(BackendError::Transport("connection reset".into())));
        let (session, _) = session(backend);
        session.poll().await.unwrap();

        let result = session.submit("hello?", "chat").await;
        assert_eq!(result, Err(SessionError::Transport("connection reset".into())));
        assert_eq!(session.entries().len(), 1);
        assert!(session.pending_timestamp().is_none());
    }

    #[tokio::test]
    async fn plus_one_routes_to_review_entries_only() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_fetch(Ok(vec![
            record(1, 1),
            json!({
                "id": 2,
                "venue_id": 12,
                "author_id": 1,
                "body": "great pairing session",
                "created_at": "2012-05-16 11:00:00",
                "type": "review",
                "recipient_id": 2,
                "review_id": 77
            }),
        ]));
        let (session, _) = session(backend);
        session.poll().await.unwrap();
        let mut events = session.subscribe();

        let metadata = json!({ "nickname": "emmanuel" }).as_object().unwrap().clone();
        assert!(session.apply_plus_one(2, 9, metadata.clone()));
        assert!(session.apply_plus_one(2, 9, metadata));
        assert!(!session.apply_plus_one(1, 9, PlusOneMetadata::new()));
        assert!(!session.apply_plus_one(99, 9, PlusOneMetadata::new()));

        let entry = session.entry(2).unwrap();
        assert_eq!(entry.as_love().unwrap().plus_one_count(), 1);
        assert!(matches!(
            events.try_recv().unwrap(),
            SessionEvent::PlusOneAdded { entry_id: 2, actor_id: 9, .. }
        ));
    }

    #[tokio::test]
    async fn close_drops_state_and_refuses_work() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_fetch(Ok(vec![record(1, 1)]));
        let (session, _) = session(backend);
        session.poll().await.unwrap();

        session.close();
        session.close();
        assert!(session.is_closed());
        assert!(session.entries().is_empty());
        assert_eq!(session.poll().await, Err(SessionError::Closed));
        assert_eq!(session.submit("late", "chat").await, Err(SessionError::Closed));
        assert!(!session.apply_plus_one(1, 2, PlusOneMetadata::new()));
    }
}
