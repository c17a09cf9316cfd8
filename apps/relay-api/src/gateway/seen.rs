//! Read-state tracking: seen transitions and unread-count aggregation.
//!
//! Unread counters are a cache. The store's delivery statuses are the only
//! source of truth; `UnreadLedger::recompute` restates the cache from the
//! store whenever there is any doubt.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::json;

use crate::chat::{ChatKey, DeliveryStatus};
use crate::error::StoreError;
use crate::store::MessageStore;

use super::events::EventName;
use super::registry::ConnectionRegistry;

/// Cached per-(chat, user) unread counts.
pub struct UnreadLedger {
    counts: DashMap<(String, String), u64>,
}

impl UnreadLedger {
    pub fn new() -> Self {
        Self {
            counts: DashMap::new(),
        }
    }

    fn key(chat_key: &ChatKey, user_id: &str) -> (String, String) {
        (chat_key.to_string(), user_id.to_string())
    }

    pub fn get(&self, chat_key: &ChatKey, user_id: &str) -> u64 {
        self.counts
            .get(&Self::key(chat_key, user_id))
            .map(|c| *c)
            .unwrap_or(0)
    }

    pub fn increment(&self, chat_key: &ChatKey, user_id: &str) {
        *self.counts.entry(Self::key(chat_key, user_id)).or_insert(0) += 1;
    }

    pub fn decrement(&self, chat_key: &ChatKey, user_id: &str, by: u64) {
        if let Some(mut count) = self.counts.get_mut(&Self::key(chat_key, user_id)) {
            *count = count.saturating_sub(by);
        }
    }

    pub fn reset(&self, chat_key: &ChatKey, user_id: &str) {
        self.counts.insert(Self::key(chat_key, user_id), 0);
    }

    /// Restate the cached count from the store and return it.
    pub async fn recompute(
        &self,
        store: &dyn MessageStore,
        chat_key: &ChatKey,
        user_id: &str,
    ) -> Result<u64, StoreError> {
        let truth = store.unread_count(chat_key, user_id).await?;
        self.counts.insert(Self::key(chat_key, user_id), truth);
        Ok(truth)
    }
}

impl Default for UnreadLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// Seen/read-state tracker: marks messages seen and fans the resulting
/// state changes out to both participants.
pub struct SeenTracker {
    store: Arc<dyn MessageStore>,
    registry: Arc<ConnectionRegistry>,
    unread: Arc<UnreadLedger>,
    preview_chars: usize,
}

impl SeenTracker {
    pub fn new(
        store: Arc<dyn MessageStore>,
        registry: Arc<ConnectionRegistry>,
        unread: Arc<UnreadLedger>,
        preview_chars: usize,
    ) -> Self {
        Self {
            store,
            registry,
            unread,
            preview_chars,
        }
    }

    /// Mark one message seen by `user_id`. Silently ignores unknown
    /// messages, chats the message does not belong to, and callers who are
    /// not the message's recipient; marking an already-seen message again
    /// is a no-op with no events.
    pub async fn mark_seen(
        &self,
        user_id: &str,
        chat_key: &ChatKey,
        message_id: i64,
    ) -> Result<(), StoreError> {
        let Some(message) = self.store.get(message_id).await? else {
            return Ok(());
        };
        if message.chat_key != *chat_key || message.recipient() != user_id {
            return Ok(());
        }

        if !self
            .store
            .advance_status(message_id, DeliveryStatus::Seen)
            .await?
        {
            // Already seen — idempotent, no events.
            return Ok(());
        }

        self.unread.decrement(chat_key, user_id, 1);

        let seen = json!({
            "chatKey": chat_key,
            "messageId": message_id,
            "seenBy": user_id,
        });
        self.registry
            .push_to_user(&message.sender_id, EventName::SEEN, &seen);

        self.push_chat_update(chat_key, user_id).await?;
        Ok(())
    }

    /// Mark every not-yet-seen message addressed to `user_id` in this chat
    /// as seen in one step, and emit a single aggregated `seen` event.
    /// A second call is a no-op with no duplicate events.
    pub async fn mark_all_seen(&self, user_id: &str, chat_key: &ChatKey) -> Result<(), StoreError> {
        let Some(sender_id) = chat_key.other(user_id) else {
            // Caller is not a participant; races with navigation are expected.
            return Ok(());
        };
        let sender_id = sender_id.to_string();

        let transitioned = self.store.mark_all_seen(chat_key, user_id).await?;
        if transitioned.is_empty() {
            return Ok(());
        }
        // Decrement by what actually transitioned, not a reset to zero: a
        // send can persist and bump the ledger while the store call is in
        // flight, and that unread must survive.
        self.unread
            .decrement(chat_key, user_id, transitioned.len() as u64);

        let seen = json!({
            "chatKey": chat_key,
            "messageId": "all",
            "seenBy": user_id,
        });
        self.registry.push_to_user(&sender_id, EventName::SEEN, &seen);

        self.push_chat_update(chat_key, user_id).await?;
        Ok(())
    }

    /// Refresh the marking user's own devices: new unread count plus the
    /// current chat preview.
    async fn push_chat_update(&self, chat_key: &ChatKey, user_id: &str) -> Result<(), StoreError> {
        let preview = self
            .store
            .list(chat_key, 1)
            .await?
            .last()
            .map(|m| m.preview(self.preview_chars));
        let update = json!({
            "chatKey": chat_key,
            "unreadCount": self.unread.get(chat_key, user_id),
            "lastMessagePreview": preview,
        });
        self.registry
            .push_to_user(user_id, EventName::CHAT_UPDATE, &update);
        Ok(())
    }
}
