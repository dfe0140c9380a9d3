use serde::Serialize;

use venuechat_types::models::{EntryId, UserId, VenueId};

use crate::entry::ChatEntry;

/// Changes a session publishes to its subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum SessionEvent {
    /// The first poll of the session completed.
    Loaded { venue_id: VenueId },

    /// Entries were appended to the log, in the order they were appended.
    EntriesAppended {
        venue_id: VenueId,
        entries: Vec<ChatEntry>,
        last_seen_id: EntryId,
        active_chatters: usize,
    },

    /// An endorsement landed on a review entry.
    PlusOneAdded {
        venue_id: VenueId,
        entry_id: EntryId,
        actor_id: UserId,
    },

    /// The session was torn down.
    Closed { venue_id: VenueId },
}
