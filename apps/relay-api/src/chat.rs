//! Chat domain model: canonical chat keys, messages, and delivery status.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Why a chat key could not be built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatKeyError {
    /// Both sides of the pair are the same user.
    SelfChat,
    /// Empty participant or unparseable wire form.
    Malformed,
}

impl fmt::Display for ChatKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatKeyError::SelfChat => write!(f, "a chat needs two distinct participants"),
            ChatKeyError::Malformed => write!(f, "malformed chat key"),
        }
    }
}

/// Identifier for a two-party chat: the unordered pair of participant IDs.
///
/// The pair is canonicalized (lexicographically smaller ID first) so that the
/// same two users always map to the same key regardless of who initiates.
/// Wire form is `"<low>:<high>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChatKey {
    low: String,
    high: String,
}

impl ChatKey {
    pub fn new(a: &str, b: &str) -> Result<Self, ChatKeyError> {
        if a.is_empty() || b.is_empty() || a.contains(':') || b.contains(':') {
            return Err(ChatKeyError::Malformed);
        }
        if a == b {
            return Err(ChatKeyError::SelfChat);
        }
        let (low, high) = if a < b { (a, b) } else { (b, a) };
        Ok(Self {
            low: low.to_string(),
            high: high.to_string(),
        })
    }

    /// Parse the `"<low>:<high>"` wire form. Accepts either participant order.
    pub fn parse(s: &str) -> Result<Self, ChatKeyError> {
        let (a, b) = s.split_once(':').ok_or(ChatKeyError::Malformed)?;
        Self::new(a, b)
    }

    pub fn participants(&self) -> (&str, &str) {
        (&self.low, &self.high)
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.low == user_id || self.high == user_id
    }

    /// The participant that is not `user_id`, or `None` if `user_id` is not
    /// part of this chat.
    pub fn other(&self, user_id: &str) -> Option<&str> {
        if self.low == user_id {
            Some(&self.high)
        } else if self.high == user_id {
            Some(&self.low)
        } else {
            None
        }
    }
}

impl fmt::Display for ChatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.low, self.high)
    }
}

impl Serialize for ChatKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ChatKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ChatKey::parse(&s).map_err(de::Error::custom)
    }
}

/// Per-recipient delivery state of a message. In a two-party chat every
/// message has exactly one recipient, so this is a single field on the
/// message rather than a per-user map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Seen,
}

impl DeliveryStatus {
    /// Monotonic advance: the status never regresses (seen stays seen even
    /// if a late `delivered` update arrives). Returns the resulting status.
    pub fn advance(self, to: DeliveryStatus) -> DeliveryStatus {
        self.max(to)
    }
}

/// A persisted chat message. Created once by the delivery coordinator;
/// only `status` is mutated afterwards, via the monotonic advance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: i64,
    pub chat_key: ChatKey,
    pub sender_id: String,
    /// Opaque payload; the core never interprets it.
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub status: DeliveryStatus,
}

impl Message {
    /// The recipient: the chat participant that is not the sender.
    pub fn recipient(&self) -> &str {
        // A Message is only constructed after participant validation, so the
        // sender is always one side of the key.
        self.chat_key.other(&self.sender_id).unwrap_or(&self.sender_id)
    }

    /// Body truncated to `max_chars` characters for chat-list previews.
    pub fn preview(&self, max_chars: usize) -> String {
        if self.body.chars().count() <= max_chars {
            self.body.clone()
        } else {
            let mut p: String = self.body.chars().take(max_chars).collect();
            p.push('…');
            p
        }
    }
}
