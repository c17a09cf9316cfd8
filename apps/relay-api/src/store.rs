//! Abstraction over the durable message store.
//!
//! The relay core never owns message durability. It appends through this
//! trait, reads back through it, and treats every cached unread count as
//! recomputable from what the store returns. Backed by the platform's
//! document database in production and an in-memory map in tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::chat::{ChatKey, DeliveryStatus, Message};
use crate::error::StoreError;

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append a fully-formed message. IDs are assigned by the caller and
    /// are unique; ID assignment and the append are separate steps, so two
    /// concurrent sends may reach the store with their IDs inverted. The
    /// store keeps each chat ordered by ID regardless.
    async fn append(&self, message: Message) -> Result<(), StoreError>;

    /// Messages of a chat in ID order (ascending), at most `limit`,
    /// newest last. `limit == 0` means no limit.
    async fn list(&self, chat_key: &ChatKey, limit: usize) -> Result<Vec<Message>, StoreError>;

    /// Look up a single message by ID.
    async fn get(&self, message_id: i64) -> Result<Option<Message>, StoreError>;

    /// Monotonically advance a message's delivery status. Returns `true`
    /// only if the stored status actually changed; unknown IDs and
    /// already-reached statuses report `false`.
    async fn advance_status(
        &self,
        message_id: i64,
        status: DeliveryStatus,
    ) -> Result<bool, StoreError>;

    /// Mark every not-yet-seen message addressed to `recipient` in this
    /// chat as seen, in one logical step. Returns the IDs that transitioned.
    async fn mark_all_seen(
        &self,
        chat_key: &ChatKey,
        recipient: &str,
    ) -> Result<Vec<i64>, StoreError>;

    /// Ground truth for unread counters: the number of messages in this
    /// chat addressed to `user_id` whose status is not yet seen.
    async fn unread_count(&self, chat_key: &ChatKey, user_id: &str) -> Result<u64, StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation (for Phase 1 / tests)
// ---------------------------------------------------------------------------

/// In-memory `MessageStore`. Messages are kept per chat in append order.
///
/// `fail_appends` makes the next appends fail, which is how tests exercise
/// the persistence-failure path of the send pipeline.
pub struct MemoryStore {
    chats: Mutex<HashMap<String, Vec<Message>>>,
    fail_appends: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            chats: Mutex::new(HashMap::new()),
            fail_appends: AtomicBool::new(false),
        }
    }

    /// Make subsequent `append` calls fail until reset.
    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append(&self, message: Message) -> Result<(), StoreError> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(StoreError::new("append rejected (injected failure)"));
        }
        let mut chats = self.chats.lock();
        let messages = chats.entry(message.chat_key.to_string()).or_default();
        // Appends can arrive with inverted IDs; keep the chat in ID order.
        let at = messages.partition_point(|m| m.id < message.id);
        messages.insert(at, message);
        Ok(())
    }

    async fn list(&self, chat_key: &ChatKey, limit: usize) -> Result<Vec<Message>, StoreError> {
        let chats = self.chats.lock();
        let messages = chats.get(&chat_key.to_string()).cloned().unwrap_or_default();
        if limit > 0 && messages.len() > limit {
            Ok(messages[messages.len() - limit..].to_vec())
        } else {
            Ok(messages)
        }
    }

    async fn get(&self, message_id: i64) -> Result<Option<Message>, StoreError> {
        let chats = self.chats.lock();
        Ok(chats
            .values()
            .flat_map(|msgs| msgs.iter())
            .find(|m| m.id == message_id)
            .cloned())
    }

    async fn advance_status(
        &self,
        message_id: i64,
        status: DeliveryStatus,
    ) -> Result<bool, StoreError> {
        let mut chats = self.chats.lock();
        for msgs in chats.values_mut() {
            if let Some(msg) = msgs.iter_mut().find(|m| m.id == message_id) {
                let advanced = msg.status.advance(status);
                let changed = advanced != msg.status;
                msg.status = advanced;
                return Ok(changed);
            }
        }
        Ok(false)
    }

    async fn mark_all_seen(
        &self,
        chat_key: &ChatKey,
        recipient: &str,
    ) -> Result<Vec<i64>, StoreError> {
        let mut chats = self.chats.lock();
        let Some(msgs) = chats.get_mut(&chat_key.to_string()) else {
            return Ok(Vec::new());
        };
        let mut transitioned = Vec::new();
        for msg in msgs.iter_mut() {
            if msg.recipient() == recipient && msg.status != DeliveryStatus::Seen {
                msg.status = DeliveryStatus::Seen;
                transitioned.push(msg.id);
            }
        }
        Ok(transitioned)
    }

    async fn unread_count(&self, chat_key: &ChatKey, user_id: &str) -> Result<u64, StoreError> {
        let chats = self.chats.lock();
        let count = chats
            .get(&chat_key.to_string())
            .map(|msgs| {
                msgs.iter()
                    .filter(|m| m.recipient() == user_id && m.status != DeliveryStatus::Seen)
                    .count()
            })
            .unwrap_or(0);
        Ok(count as u64)
    }
}
