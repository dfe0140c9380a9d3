use async_trait::async_trait;
use serde_json::Value;

use venuechat_types::api::SubmitChatRequest;
use venuechat_types::models::{EntryId, VenueId};

use crate::error::BackendError;

/// The chat server as the session sees it.
///
/// Records come back as raw JSON so that one malformed record can be
/// rejected without losing the rest of the batch. Timeouts are the
/// implementation's business and surface as [`BackendError::Transport`].
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Records of `venue_id` with an id greater than `since_id`.
    async fn fetch_chat_entries(
        &self,
        venue_id: VenueId,
        since_id: EntryId,
    ) -> Result<Vec<Value>, BackendError>;

    /// Post a message. The answer holds the confirmed record and may also
    /// carry any other records newer than `request.since_id`.
    async fn submit_chat_entry(&self, request: SubmitChatRequest) -> Result<Vec<Value>, BackendError>;
}
