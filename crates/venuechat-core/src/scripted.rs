use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;

use venuechat_types::api::SubmitChatRequest;
use venuechat_types::models::{EntryId, VenueId};

use crate::backend::ChatBackend;
use crate::error::BackendError;

type Response = Result<Vec<Value>, BackendError>;

/// Backend that answers from queues of prepared responses.
///
/// Used to replay recorded server traffic and to drive sessions in tests.
/// An empty queue answers with no records. Calls are recorded so callers can
/// check which cursor each request carried. A fetch or submit can be held
/// open until released, to put the session in the middle of a round trip.
#[derive(Default)]
pub struct ScriptedBackend {
    fetches: Mutex<VecDeque<Response>>,
    submits: Mutex<VecDeque<Response>>,
    fetch_calls: Mutex<Vec<(VenueId, EntryId)>>,
    submit_calls: Mutex<Vec<SubmitChatRequest>>,
    fetch_gate: Mutex<Option<Arc<Notify>>>,
    submit_gate: Mutex<Option<Arc<Notify>>>,
    fetch_started: Notify,
    submit_started: Notify,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_fetch(&self, response: Response) {
        lock(&self.fetches).push_back(response);
    }

    pub fn push_submit(&self, response: Response) {
        lock(&self.submits).push_back(response);
    }

    /// Make the next fetch wait until the returned handle is notified.
    pub fn hold_next_fetch(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *lock(&self.fetch_gate) = Some(gate.clone());
        gate
    }

    /// Make the next submit wait until the returned handle is notified.
    pub fn hold_next_submit(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *lock(&self.submit_gate) = Some(gate.clone());
        gate
    }

    /// Resolves once a fetch has reached the backend.
    pub async fn fetch_started(&self) {
        self.fetch_started.notified().await;
    }

    /// Resolves once a submit has reached the backend.
    pub async fn submit_started(&self) {
        self.submit_started.notified().await;
    }

    pub fn fetch_calls(&self) -> Vec<(VenueId, EntryId)> {
        lock(&self.fetch_calls).clone()
    }

    pub fn submit_calls(&self) -> Vec<SubmitChatRequest> {
        lock(&self.submit_calls).clone()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn fetch_chat_entries(&self, venue_id: VenueId, since_id: EntryId) -> Response {
        lock(&self.fetch_calls).push((venue_id, since_id));
        let gate = lock(&self.fetch_gate).take();
        self.fetch_started.notify_one();

        if let Some(gate) = gate {
            gate.notified().await;
        }

        lock(&self.fetches).pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn submit_chat_entry(&self, request: SubmitChatRequest) -> Response {
        lock(&self.submit_calls).push(request);
        let gate = lock(&self.submit_gate).take();
        self.submit_started.notify_one();

        if let Some(gate) = gate {
            gate.notified().await;
        }

        lock(&self.submits).pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn answers_in_order_then_empty() {
        let backend = ScriptedBackend::new();
        backend.push_fetch(Ok(vec![json!({ "id": 1 })]));
        backend.push_fetch(Err(BackendError::Unauthenticated));

        assert_eq!(backend.fetch_chat_entries(4, 0).await.unwrap().len(), 1);
        assert_eq!(
            backend.fetch_chat_entries(4, 1).await,
            Err(BackendError::Unauthenticated)
        );
        assert!(backend.fetch_chat_entries(4, 1).await.unwrap().is_empty());
        assert_eq!(backend.fetch_calls(), vec![(4, 0), (4, 1), (4, 1)]);
    }

    #[tokio::test]
    async fn held_fetch_waits_for_release() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_fetch(Ok(vec![json!({ "id": 9 })]));
        let gate = backend.hold_next_fetch();

        let task = {
            let backend = backend.clone();
            tokio::spawn(async move { backend.fetch_chat_entries(1, 0).await })
        };

        backend.fetch_started().await;
        assert!(!task.is_finished());

        gate.notify_one();
        let records = task.await.unwrap().unwrap();
        assert_eq!(records, vec![json!({ "id": 9 })]);
    }
}
