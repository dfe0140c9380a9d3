use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::models::{EntryId, ReviewId, UserId, VenueId};

// -- Chat entries --

/// One chat record as the server sends it.
///
/// Every field the engine requires is optional at this layer so that a
/// record missing one of them still deserializes and can be rejected on its
/// own, without failing the rest of the batch. Ids are accepted either as
/// JSON numbers or as numeric strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawChatRecord {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<EntryId>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub venue_id: Option<VenueId>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub author_id: Option<UserId>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,

    // -- review ("love") records only --
    #[serde(default, deserialize_with = "lenient_id", skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<UserId>,
    #[serde(default, deserialize_with = "lenient_id", skip_serializing_if = "Option::is_none")]
    pub review_id: Option<ReviewId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plus_ones: Option<Vec<RawPlusOne>>,
}

/// An endorsement attached to a review record. Fields other than
/// `actor_id` are opaque to the engine and carried through as metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawPlusOne {
    #[serde(default, deserialize_with = "lenient_id")]
    pub actor_id: Option<UserId>,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

// -- Submission --

/// Outgoing chat message. `since_id` is the session's merge cursor at the
/// time of submission; the server may answer with every record newer than
/// it, not only the confirmed one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitChatRequest {
    pub venue_id: VenueId,
    pub since_id: EntryId,
    pub body: String,
    #[serde(rename = "type")]
    pub kind: String,
}

fn lenient_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IdRepr {
        Int(i64),
        Text(String),
    }

    match Option::<IdRepr>::deserialize(deserializer)? {
        None => Ok(None),
        Some(IdRepr::Int(v)) => Ok(Some(v)),
        Some(IdRepr::Text(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid numeric id '{}'", s))),
    }
}
