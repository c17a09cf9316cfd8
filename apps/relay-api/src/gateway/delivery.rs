//! Message delivery: persist-first, then best-effort fan-out.
//!
//! The send pipeline persists through the external store before any local
//! state moves. A failed append surfaces as a send failure with nothing to
//! roll back; a failed push to one live connection is logged and dropped —
//! that recipient device catches up from the store on its next fetch.

use std::sync::Arc;

use chrono::Utc;
use courier_common::SnowflakeGenerator;
use serde_json::json;

use crate::chat::{ChatKey, DeliveryStatus, Message};
use crate::error::SendError;
use crate::store::MessageStore;

use super::events::EventName;
use super::registry::ConnectionRegistry;
use super::seen::UnreadLedger;

pub struct DeliveryCoordinator {
    store: Arc<dyn MessageStore>,
    registry: Arc<ConnectionRegistry>,
    unread: Arc<UnreadLedger>,
    ids: Arc<SnowflakeGenerator>,
    preview_chars: usize,
}

impl DeliveryCoordinator {
    pub fn new(
        store: Arc<dyn MessageStore>,
        registry: Arc<ConnectionRegistry>,
        unread: Arc<UnreadLedger>,
        ids: Arc<SnowflakeGenerator>,
        preview_chars: usize,
    ) -> Self {
        Self {
            store,
            registry,
            unread,
            ids,
            preview_chars,
        }
    }

    /// Send a message: validate the sender, persist, then fan out.
    ///
    /// On success the persisted message is returned and three pushes go
    /// out: `message:new` to the recipient's live connections,
    /// `message:sent` to the sender's other connections (never the
    /// originating one), and `chat:update` to both participants. Pushes
    /// are enqueues on per-connection queues and never block this call.
    pub async fn send(
        &self,
        sender_id: &str,
        chat_key: &ChatKey,
        body: String,
        origin_connection: &str,
    ) -> Result<Message, SendError> {
        let Some(recipient) = chat_key.other(sender_id) else {
            return Err(SendError::NotParticipant);
        };
        let recipient = recipient.to_string();

        let message = Message {
            id: self.ids.generate(),
            chat_key: chat_key.clone(),
            sender_id: sender_id.to_string(),
            body,
            created_at: Utc::now(),
            status: DeliveryStatus::Sent,
        };

        // Persist-first. On failure nothing local has moved: no unread
        // bump, no events, the caller retries or surfaces the failure.
        self.store
            .append(message.clone())
            .await
            .map_err(SendError::Persistence)?;

        self.unread.increment(chat_key, &recipient);

        let new_event = json!({ "chatKey": chat_key, "message": message });
        let pushed = self
            .registry
            .push_to_user(&recipient, EventName::MESSAGE_NEW, &new_event);

        if pushed > 0 {
            // Bookkeeping only; a failure here must not fail the send.
            if let Err(e) = self
                .store
                .advance_status(message.id, DeliveryStatus::Delivered)
                .await
            {
                tracing::warn!(message_id = message.id, %e, "delivered-status update failed");
            }
        }

        let sent_event = json!({ "chatKey": chat_key, "message": message });
        self.registry.push_to_user_except(
            sender_id,
            Some(origin_connection),
            EventName::MESSAGE_SENT,
            &sent_event,
        );

        let preview = message.preview(self.preview_chars);
        for participant in [sender_id, recipient.as_str()] {
            let update = json!({
                "chatKey": chat_key,
                "unreadCount": self.unread.get(chat_key, participant),
                "lastMessagePreview": preview,
            });
            self.registry
                .push_to_user(participant, EventName::CHAT_UPDATE, &update);
        }

        tracing::debug!(
            message_id = message.id,
            chat = %chat_key,
            recipient_pushes = pushed,
            "message persisted and fanned out"
        );

        Ok(message)
    }
}
