use thiserror::Error;

use venuechat_types::models::EntryId;

/// A single chat record could not be turned into a [`crate::entry::ChatEntry`].
///
/// Always local to the offending record; the rest of the batch is merged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed record: {message}")]
    Malformed { message: String },

    #[error("missing required field `{field}`")]
    MissingField { field: &'static str },

    #[error("unparsable timestamp '{value}'")]
    InvalidTimestamp { value: String },

    #[error("review entry {id} names its own author as recipient")]
    SelfEndorsement { id: EntryId },
}

impl ParseError {
    #[must_use]
    pub fn malformed(message: impl std::fmt::Display) -> Self {
        Self::Malformed {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn missing(field: &'static str) -> Self {
        Self::MissingField { field }
    }

    /// Timestamp failures are the only ones worth retrying: everything else
    /// is structural and will not heal on re-delivery.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::InvalidTimestamp { .. })
    }
}

/// Failure reported by a [`crate::backend::ChatBackend`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("caller is not authenticated")]
    Unauthenticated,

    #[error("transport error: {0}")]
    Transport(String),
}

/// Failure of a session operation. None of these leave the session unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("caller is not authenticated")]
    Unauthenticated,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("session closed")]
    Closed,
}

impl From<BackendError> for SessionError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unauthenticated => Self::Unauthenticated,
            BackendError::Transport(message) => Self::Transport(message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}")]
    Invalid { key: &'static str, value: String },
}

impl ConfigError {
    #[must_use]
    pub fn invalid(key: &'static str, value: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            value: value.into(),
        }
    }
}
