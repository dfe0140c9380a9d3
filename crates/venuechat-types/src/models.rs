/// Identifier aliases. The chat server hands out plain integers for all of
/// these; the session only ever holds them by reference.

/// Server-assigned chat message id. Unique within one venue's chat.
pub type EntryId = i64;

/// Venue (chat room) id.
pub type VenueId = i64;

/// User id. Users are owned by the surrounding app, never by the chat engine.
pub type UserId = i64;

/// Review record id backing a love/review chat message.
pub type ReviewId = i64;

/// Wire `type` tag of a plain chat message.
pub const CHAT_ENTRY_TYPE: &str = "chat";

/// Wire `type` tag of a love/review chat message.
pub const LOVE_ENTRY_TYPE: &str = "review";
