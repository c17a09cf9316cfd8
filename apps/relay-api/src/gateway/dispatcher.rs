//! Event bus: one ingress for inbound transport events, one egress for
//! outbound pushes.
//!
//! Every mutation of the registry, presence map, and unread ledger funnels
//! through here, driven by the per-connection socket tasks. Outbound events
//! for one connection keep their enqueue order because a connection's queue
//! is a single mpsc channel. A malformed inbound event answers with an
//! `error` push and never closes the connection.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use courier_common::id::{prefix, prefixed_ulid};
use courier_common::SnowflakeGenerator;
use serde_json::json;
use tokio::sync::mpsc;

use crate::chat::ChatKey;
use crate::config::Config;
use crate::error::EventError;
use crate::store::MessageStore;

use super::delivery::DeliveryCoordinator;
use super::events::{
    ClientEvent, EventName, InboundName, MarkSeenPayload, SeenTarget, SendPayload, ServerEvent,
    TypingPayload,
};
use super::presence::PresenceTracker;
use super::registry::ConnectionRegistry;
use super::seen::{SeenTracker, UnreadLedger};
use super::typing::TypingRelay;

pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    presence: Arc<PresenceTracker>,
    delivery: DeliveryCoordinator,
    seen: SeenTracker,
    typing: TypingRelay,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn MessageStore>, config: &Config) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let presence = Arc::new(PresenceTracker::new());
        let unread = Arc::new(UnreadLedger::new());
        let ids = Arc::new(SnowflakeGenerator::new(config.worker_id));

        let delivery = DeliveryCoordinator::new(
            store.clone(),
            registry.clone(),
            unread.clone(),
            ids,
            config.preview_chars,
        );
        let seen = SeenTracker::new(
            store.clone(),
            registry.clone(),
            unread,
            config.preview_chars,
        );
        let typing = TypingRelay::new(
            registry.clone(),
            Duration::from_millis(config.typing_window_ms),
        );

        Self {
            registry,
            presence,
            delivery,
            seen,
            typing,
        }
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    /// Register a connection for an authenticated user. Pushes `ready` onto
    /// the new connection's queue and announces `user:online` to everyone
    /// else if this was the user's offline→online edge. Returns the
    /// connection ID and the queue the socket writer drains.
    pub fn connect(&self, user_id: &str) -> (String, mpsc::UnboundedReceiver<ServerEvent>) {
        let connection_id = prefixed_ulid(prefix::CONNECTION);
        let (tx, rx) = mpsc::unbounded_channel();

        let first = self.registry.register(user_id, &connection_id, tx);

        self.registry.push(
            &connection_id,
            EventName::READY,
            json!({ "connectionId": connection_id, "userId": user_id }),
        );

        if first && self.presence.set_online(user_id) {
            self.registry.broadcast_except_user(
                user_id,
                EventName::USER_ONLINE,
                &json!({ "userId": user_id }),
            );
            tracing::info!(%user_id, "user online");
        }

        (connection_id, rx)
    }

    /// Drop a connection. Announces `user:offline` with the last-seen
    /// timestamp if this was the user's last live connection. Safe to call
    /// for already-removed connections.
    pub fn disconnect(&self, user_id: &str, connection_id: &str) {
        let last = self.registry.unregister(user_id, connection_id);
        if last {
            let at = Utc::now();
            if self.presence.set_offline(user_id, at) {
                self.registry.broadcast_except_user(
                    user_id,
                    EventName::USER_OFFLINE,
                    &json!({ "userId": user_id, "lastSeen": at }),
                );
                tracing::info!(%user_id, "user offline");
            }
        }
    }

    /// Route one raw inbound frame from an established connection.
    pub async fn handle(
        &self,
        user_id: &str,
        connection_id: &str,
        raw: &str,
    ) -> Result<(), EventError> {
        let envelope: ClientEvent = serde_json::from_str(raw)
            .map_err(|e| EventError::malformed(format!("invalid event envelope: {e}")))?;

        match envelope.event.as_str() {
            InboundName::SEND => {
                let payload: SendPayload = decode(envelope.data)?;
                let chat_key = parse_chat_key(&payload.chat_key)?;
                self.delivery
                    .send(user_id, &chat_key, payload.body, connection_id)
                    .await?;
                Ok(())
            }
            InboundName::MARK_SEEN => {
                let payload: MarkSeenPayload = decode(envelope.data)?;
                let chat_key = parse_chat_key(&payload.chat_key)?;
                match payload.message_id {
                    SeenTarget::Message(id) => {
                        self.seen.mark_seen(user_id, &chat_key, id).await?
                    }
                    SeenTarget::All => self.seen.mark_all_seen(user_id, &chat_key).await?,
                }
                Ok(())
            }
            InboundName::TYPING => {
                let payload: TypingPayload = decode(envelope.data)?;
                let chat_key = parse_chat_key(&payload.chat_key)?;
                self.typing.notify(user_id, &chat_key);
                Ok(())
            }
            InboundName::IDENTIFY => Err(EventError::malformed("already identified")),
            other => Err(EventError::malformed(format!("unknown event `{other}`"))),
        }
    }

    /// Surface a dispatch error to the connection it came from.
    pub fn push_error(&self, connection_id: &str, err: &EventError) {
        self.registry.push(
            connection_id,
            EventName::ERROR,
            json!({ "code": err.code(), "message": err.message() }),
        );
    }

    /// Drop stale typing rate-limit stamps (periodic maintenance).
    pub fn prune_typing(&self, max_age: Duration) -> usize {
        self.typing.prune(max_age)
    }
}

fn decode<T: serde::de::DeserializeOwned>(data: serde_json::Value) -> Result<T, EventError> {
    serde_json::from_value(data).map_err(|e| EventError::malformed(format!("invalid payload: {e}")))
}

fn parse_chat_key(raw: &str) -> Result<ChatKey, EventError> {
    ChatKey::parse(raw).map_err(|e| EventError::malformed(format!("invalid chat key: {e}")))
}

#[cfg(test)]
mod tests {
    use crate::store::MemoryStore;

    use super::*;

    fn dispatcher() -> (Dispatcher, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let config = Config {
            port: 0,
            worker_id: 0,
            typing_window_ms: 2000,
            preview_chars: 80,
            handshake_timeout_secs: 10,
        };
        (
            Dispatcher::new(store.clone() as Arc<dyn MessageStore>, &config),
            store,
        )
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    #[tokio::test]
    async fn connect_pushes_ready_first() {
        let (dispatcher, _) = dispatcher();
        let (conn, mut rx) = dispatcher.connect("usr_a");

        let events = drain(&mut rx);
        assert_eq!(events[0].event, "ready");
        assert_eq!(events[0].seq, 1);
        assert_eq!(events[0].data["connectionId"], conn.as_str());
        assert_eq!(events[0].data["userId"], "usr_a");
    }

    #[tokio::test]
    async fn presence_edges_fire_once_across_devices() {
        let (dispatcher, _) = dispatcher();
        let (_conn_b, mut rx_b) = dispatcher.connect("usr_b");
        drain(&mut rx_b);

        // First device: usr_b's connection sees the online edge.
        let (conn_a1, mut rx_a1) = dispatcher.connect("usr_a");
        let online: Vec<_> = drain(&mut rx_b)
            .into_iter()
            .filter(|e| e.event == "user:online")
            .collect();
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].data["userId"], "usr_a");

        // Second device: no new presence event.
        let (conn_a2, _rx_a2) = dispatcher.connect("usr_a");
        assert!(drain(&mut rx_b).iter().all(|e| e.event != "user:online"));

        // One device down: still online.
        dispatcher.disconnect("usr_a", &conn_a1);
        assert!(drain(&mut rx_b).iter().all(|e| e.event != "user:offline"));
        assert!(dispatcher.presence().is_online("usr_a"));

        // Last device down: one offline event with last-seen.
        dispatcher.disconnect("usr_a", &conn_a2);
        let offline: Vec<_> = drain(&mut rx_b)
            .into_iter()
            .filter(|e| e.event == "user:offline")
            .collect();
        assert_eq!(offline.len(), 1);
        assert!(offline[0].data["lastSeen"].is_string());
        assert!(!dispatcher.presence().is_online("usr_a"));
        assert!(dispatcher.presence().last_seen("usr_a").is_some());

        drain(&mut rx_a1);
    }

    #[tokio::test]
    async fn malformed_events_are_rejected_without_side_effects() {
        let (dispatcher, store) = dispatcher();
        let (conn, mut rx) = dispatcher.connect("usr_a");
        drain(&mut rx);

        for raw in [
            "not json",
            r#"{"event": "warp", "data": {}}"#,
            r#"{"event": "send", "data": {"chatKey": 7}}"#,
            r#"{"event": "send", "data": {"chatKey": "usr_a", "body": "x"}}"#,
            r#"{"event": "identify", "data": {"token": "t"}}"#,
        ] {
            let err = dispatcher.handle("usr_a", &conn, raw).await.unwrap_err();
            assert_eq!(err.code(), "MALFORMED_EVENT", "{raw}");
        }

        let chat = ChatKey::new("usr_a", "usr_b").unwrap();
        assert!(store.list(&chat, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_routes_to_delivery() {
        let (dispatcher, store) = dispatcher();
        let (conn_a, mut rx_a) = dispatcher.connect("usr_a");
        let (_conn_b, mut rx_b) = dispatcher.connect("usr_b");
        drain(&mut rx_a);
        drain(&mut rx_b);

        let raw = r#"{"event": "send", "data": {"chatKey": "usr_a:usr_b", "body": "hi"}}"#;
        dispatcher.handle("usr_a", &conn_a, raw).await.unwrap();

        let chat = ChatKey::new("usr_a", "usr_b").unwrap();
        assert_eq!(store.list(&chat, 0).await.unwrap().len(), 1);
        let b_events = drain(&mut rx_b);
        assert!(b_events.iter().any(|e| e.event == "message:new"));
    }

    #[tokio::test]
    async fn send_to_foreign_chat_is_surfaced() {
        let (dispatcher, _) = dispatcher();
        let (conn, mut rx) = dispatcher.connect("usr_a");
        drain(&mut rx);

        let raw = r#"{"event": "send", "data": {"chatKey": "usr_b:usr_c", "body": "hi"}}"#;
        let err = dispatcher.handle("usr_a", &conn, raw).await.unwrap_err();
        assert_eq!(err.code(), "NOT_PARTICIPANT");
    }

    #[tokio::test]
    async fn mark_seen_all_and_single_route_to_tracker() {
        let (dispatcher, store) = dispatcher();
        let (conn_a, mut rx_a) = dispatcher.connect("usr_a");
        let (conn_b, mut rx_b) = dispatcher.connect("usr_b");
        drain(&mut rx_a);
        drain(&mut rx_b);

        dispatcher
            .handle(
                "usr_a",
                &conn_a,
                r#"{"event": "send", "data": {"chatKey": "usr_a:usr_b", "body": "one"}}"#,
            )
            .await
            .unwrap();
        dispatcher
            .handle(
                "usr_a",
                &conn_a,
                r#"{"event": "send", "data": {"chatKey": "usr_a:usr_b", "body": "two"}}"#,
            )
            .await
            .unwrap();

        dispatcher
            .handle(
                "usr_b",
                &conn_b,
                r#"{"event": "markSeen", "data": {"chatKey": "usr_a:usr_b", "messageId": "all"}}"#,
            )
            .await
            .unwrap();

        let chat = ChatKey::new("usr_a", "usr_b").unwrap();
        assert_eq!(store.unread_count(&chat, "usr_b").await.unwrap(), 0);
        let seen: Vec<_> = drain(&mut rx_a)
            .into_iter()
            .filter(|e| e.event == "seen")
            .collect();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].data["messageId"], "all");
    }

    #[tokio::test]
    async fn unknown_references_in_mark_seen_are_silent() {
        let (dispatcher, _) = dispatcher();
        let (conn, mut rx) = dispatcher.connect("usr_a");
        drain(&mut rx);

        // Chat that exists as a key but has no messages, and a bogus id.
        let raw = r#"{"event": "markSeen", "data": {"chatKey": "usr_a:usr_b", "messageId": 999}}"#;
        dispatcher.handle("usr_a", &conn, raw).await.unwrap();
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn typing_relays_through() {
        let (dispatcher, _) = dispatcher();
        let (conn_a, mut rx_a) = dispatcher.connect("usr_a");
        let (_conn_b, mut rx_b) = dispatcher.connect("usr_b");
        drain(&mut rx_a);
        drain(&mut rx_b);

        let raw = r#"{"event": "typing", "data": {"chatKey": "usr_a:usr_b"}}"#;
        dispatcher.handle("usr_a", &conn_a, raw).await.unwrap();
        dispatcher.handle("usr_a", &conn_a, raw).await.unwrap();

        let typing: Vec<_> = drain(&mut rx_b)
            .into_iter()
            .filter(|e| e.event == "typing")
            .collect();
        assert_eq!(typing.len(), 1, "second signal inside window is dropped");
    }
}
