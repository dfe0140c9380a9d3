use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

use venuechat_core::{BackendError, ScriptedBackend};
use venuechat_types::models::{CHAT_ENTRY_TYPE, EntryId, UserId, VenueId};

/// A recorded exchange between one venue chat view and the server.
#[derive(Debug, Deserialize)]
pub struct Transcript {
    pub venue_id: VenueId,
    /// Wall-clock time at the start of the recording. Defaults to the
    /// current time.
    #[serde(default)]
    pub now: Option<DateTime<Utc>>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Poll {
        response: RecordedResponse,
    },
    Submit {
        body: String,
        #[serde(rename = "type", default = "default_kind")]
        kind: String,
        response: RecordedResponse,
    },
    PlusOne {
        entry_id: EntryId,
        actor_id: UserId,
        #[serde(default)]
        metadata: Map<String, Value>,
    },
    /// Move the replay clock forward.
    Advance {
        seconds: i64,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordedResponse {
    Records(Vec<Value>),
    Unauthenticated,
    TransportError(String),
}

impl RecordedResponse {
    fn into_result(self) -> Result<Vec<Value>, BackendError> {
        match self {
            Self::Records(records) => Ok(records),
            Self::Unauthenticated => Err(BackendError::Unauthenticated),
            Self::TransportError(message) => Err(BackendError::Transport(message)),
        }
    }
}

fn default_kind() -> String {
    CHAT_ENTRY_TYPE.to_string()
}

impl Transcript {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read transcript {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse transcript {}", path.display()))
    }

    /// Backend that answers the transcript's polls and submits in order.
    pub fn backend(&self) -> ScriptedBackend {
        let backend = ScriptedBackend::new();
        for step in &self.steps {
            match step {
                Step::Poll { response } => backend.push_fetch(response.clone().into_result()),
                Step::Submit { response, .. } => backend.push_submit(response.clone().into_result()),
                Step::PlusOne { .. } | Step::Advance { .. } => {}
            }
        }
        backend
    }
}
