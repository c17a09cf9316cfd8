//! Error taxonomy for the relay core.
//!
//! Three of the four failure classes are surfaced to the caller; push
//! failures to individual live connections are logged and swallowed at the
//! fan-out site (a persisted message that could not be pushed is not a
//! failed send — the recipient picks it up on the next store fetch).

use std::fmt;

/// A message-store operation failed. Carries the store's own description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError(pub String);

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "message store error: {}", self.0)
    }
}

/// Error returned from the delivery coordinator's send path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The sender is not a participant of the target chat.
    NotParticipant,
    /// The store append failed; the message was not persisted and no local
    /// state was touched. The caller decides whether to retry.
    Persistence(StoreError),
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::NotParticipant => write!(f, "sender is not a participant of this chat"),
            SendError::Persistence(e) => write!(f, "send not persisted: {e}"),
        }
    }
}

/// Error surfaced to a connection by the dispatcher. Converts to an
/// outbound `error` event; the connection always stays open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Unknown event name or undecodable payload.
    Malformed(String),
    /// Send rejected: sender not in the chat.
    NotParticipant,
    /// Send rejected: the store write failed.
    Persistence(StoreError),
}

impl EventError {
    pub fn malformed(detail: impl Into<String>) -> Self {
        EventError::Malformed(detail.into())
    }

    /// Stable machine-readable code carried on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            EventError::Malformed(_) => "MALFORMED_EVENT",
            EventError::NotParticipant => "NOT_PARTICIPANT",
            EventError::Persistence(_) => "PERSISTENCE_ERROR",
        }
    }

    /// Human-readable description carried on the wire.
    pub fn message(&self) -> String {
        match self {
            EventError::Malformed(detail) => detail.clone(),
            EventError::NotParticipant => "you are not a participant of this chat".to_string(),
            EventError::Persistence(_) => "message could not be persisted; retry the send".to_string(),
        }
    }
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

impl From<SendError> for EventError {
    fn from(err: SendError) -> Self {
        match err {
            SendError::NotParticipant => EventError::NotParticipant,
            SendError::Persistence(e) => EventError::Persistence(e),
        }
    }
}

impl From<StoreError> for EventError {
    fn from(err: StoreError) -> Self {
        EventError::Persistence(err)
    }
}
