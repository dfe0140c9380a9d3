use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use venuechat_types::api::RawChatRecord;
use venuechat_types::models::{CHAT_ENTRY_TYPE, EntryId, LOVE_ENTRY_TYPE, ReviewId, UserId, VenueId};

use crate::error::ParseError;
use crate::timestamp::ChatTimestampFormatter;

/// Opaque endorsement details as the server sent them (everything on a
/// plus-one except `actor_id`).
pub type PlusOneMetadata = Map<String, Value>;

/// Fields every chat entry carries regardless of its kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryHeader {
    pub id: EntryId,
    pub venue_id: VenueId,
    pub author_id: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
    /// Wire `type` tag, kept verbatim so unknown kinds survive a round trip.
    pub type_tag: String,
}

/// A love/review message: one user endorsing another, which other users can
/// then plus-one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoveChatEntry {
    pub header: EntryHeader,
    pub recipient_id: UserId,
    pub review_id: ReviewId,
    plus_ones: HashMap<UserId, PlusOneMetadata>,
}

impl LoveChatEntry {
    pub fn new(
        header: EntryHeader,
        recipient_id: UserId,
        review_id: ReviewId,
    ) -> Result<Self, ParseError> {
        if recipient_id == header.author_id {
            return Err(ParseError::SelfEndorsement { id: header.id });
        }
        Ok(Self {
            header,
            recipient_id,
            review_id,
            plus_ones: HashMap::new(),
        })
    }

    /// Record an endorsement. An actor endorses at most once: a repeat
    /// replaces the earlier metadata. Returns `true` if the actor is new.
    pub fn add_plus_one(&mut self, actor_id: UserId, metadata: PlusOneMetadata) -> bool {
        self.plus_ones.insert(actor_id, metadata).is_none()
    }

    pub fn plus_ones(&self) -> &HashMap<UserId, PlusOneMetadata> {
        &self.plus_ones
    }

    pub fn plus_one_count(&self) -> usize {
        self.plus_ones.len()
    }

    pub fn has_plus_one_from(&self, actor_id: UserId) -> bool {
        self.plus_ones.contains_key(&actor_id)
    }
}

/// One message in a venue's chat log.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChatEntry {
    Generic(EntryHeader),
    Love(LoveChatEntry),
}

impl ChatEntry {
    /// Build an entry from a wire record.
    ///
    /// The `type` tag picks the variant; anything other than `"review"`
    /// (including a missing tag) is a generic message. Structural problems
    /// are checked before the timestamp so that only records whose sole
    /// fault is the timestamp come back as [`ParseError::InvalidTimestamp`].
    pub fn parse(raw: &RawChatRecord, formatter: &ChatTimestampFormatter) -> Result<Self, ParseError> {
        let id = raw.id.ok_or_else(|| ParseError::missing("id"))?;
        let venue_id = raw.venue_id.ok_or_else(|| ParseError::missing("venue_id"))?;
        let author_id = raw.author_id.ok_or_else(|| ParseError::missing("author_id"))?;
        let created_raw = raw
            .created_at
            .as_deref()
            .ok_or_else(|| ParseError::missing("created_at"))?;
        let type_tag = raw
            .kind
            .clone()
            .unwrap_or_else(|| CHAT_ENTRY_TYPE.to_string());

        let love_fields = if type_tag == LOVE_ENTRY_TYPE {
            let recipient_id = raw
                .recipient_id
                .ok_or_else(|| ParseError::missing("recipient_id"))?;
            if recipient_id == author_id {
                return Err(ParseError::SelfEndorsement { id });
            }
            let review_id = raw.review_id.ok_or_else(|| ParseError::missing("review_id"))?;
            let mut plus_ones = Vec::new();
            for plus_one in raw.plus_ones.iter().flatten() {
                let actor_id = plus_one
                    .actor_id
                    .ok_or_else(|| ParseError::missing("plus_ones.actor_id"))?;
                plus_ones.push((actor_id, plus_one.metadata.clone()));
            }
            Some((recipient_id, review_id, plus_ones))
        } else {
            None
        };

        let header = EntryHeader {
            id,
            venue_id,
            author_id,
            body: raw.body.clone(),
            created_at: formatter.parse(created_raw)?,
            type_tag,
        };

        match love_fields {
            Some((recipient_id, review_id, plus_ones)) => {
                let mut love = LoveChatEntry::new(header, recipient_id, review_id)?;
                for (actor_id, metadata) in plus_ones {
                    love.add_plus_one(actor_id, metadata);
                }
                Ok(Self::Love(love))
            }
            None => Ok(Self::Generic(header)),
        }
    }

    /// Parse straight from JSON. A value that does not even have the shape
    /// of a chat record is [`ParseError::Malformed`].
    pub fn from_value(value: &Value, formatter: &ChatTimestampFormatter) -> Result<Self, ParseError> {
        let raw = RawChatRecord::deserialize(value).map_err(ParseError::malformed)?;
        Self::parse(&raw, formatter)
    }

    pub fn header(&self) -> &EntryHeader {
        match self {
            Self::Generic(header) => header,
            Self::Love(love) => &love.header,
        }
    }

    pub fn id(&self) -> EntryId {
        self.header().id
    }

    pub fn venue_id(&self) -> VenueId {
        self.header().venue_id
    }

    pub fn author_id(&self) -> UserId {
        self.header().author_id
    }

    pub fn body(&self) -> &str {
        &self.header().body
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.header().created_at
    }

    pub fn type_tag(&self) -> &str {
        &self.header().type_tag
    }

    pub fn as_love(&self) -> Option<&LoveChatEntry> {
        match self {
            Self::Love(love) => Some(love),
            Self::Generic(_) => None,
        }
    }

    pub fn as_love_mut(&mut self) -> Option<&mut LoveChatEntry> {
        match self {
            Self::Love(love) => Some(love),
            Self::Generic(_) => None,
        }
    }
}
