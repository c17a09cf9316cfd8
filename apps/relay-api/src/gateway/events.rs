//! Wire-format envelopes and per-event payload types.
//!
//! Both directions use a `{event, data}` JSON envelope. Payloads stay as
//! `serde_json::Value` in the envelope and are decoded per event name, so
//! an undecodable payload rejects that one event without tearing anything
//! else down.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Client → Server
// ---------------------------------------------------------------------------

/// An inbound event envelope.
#[derive(Debug, Deserialize)]
pub struct ClientEvent {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Inbound event names.
pub struct InboundName;

impl InboundName {
    pub const IDENTIFY: &'static str = "identify";
    pub const SEND: &'static str = "send";
    pub const MARK_SEEN: &'static str = "markSeen";
    pub const TYPING: &'static str = "typing";
}

#[derive(Debug, Deserialize)]
pub struct IdentifyPayload {
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendPayload {
    pub chat_key: String,
    pub body: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkSeenPayload {
    pub chat_key: String,
    pub message_id: SeenTarget,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub chat_key: String,
}

/// Target of a `markSeen`: one message ID, or the string `"all"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeenTarget {
    Message(i64),
    All,
}

impl<'de> Deserialize<'de> for SeenTarget {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Number(n) => n
                .as_i64()
                .map(SeenTarget::Message)
                .ok_or_else(|| de::Error::custom("message id out of range")),
            Value::String(s) if s == "all" => Ok(SeenTarget::All),
            _ => Err(de::Error::custom("expected a message id or \"all\"")),
        }
    }
}

// ---------------------------------------------------------------------------
// Server → Client
// ---------------------------------------------------------------------------

/// An outbound event envelope. `seq` is assigned per connection at enqueue
/// time and is strictly increasing on any one connection.
#[derive(Debug, Clone, Serialize)]
pub struct ServerEvent {
    pub event: &'static str,
    pub seq: u64,
    pub data: Value,
}

/// Outbound event names.
pub struct EventName;

impl EventName {
    pub const READY: &'static str = "ready";
    pub const MESSAGE_NEW: &'static str = "message:new";
    pub const MESSAGE_SENT: &'static str = "message:sent";
    pub const CHAT_UPDATE: &'static str = "chat:update";
    pub const SEEN: &'static str = "seen";
    pub const TYPING: &'static str = "typing";
    pub const USER_ONLINE: &'static str = "user:online";
    pub const USER_OFFLINE: &'static str = "user:offline";
    pub const ERROR: &'static str = "error";
}
