//! Connection registry: per-user live connection sets and outbound queues.
//!
//! Each live connection owns an unbounded mpsc sender draining into its
//! socket writer task, so pushes addressed to one connection arrive in
//! enqueue order and a slow socket never blocks fan-out to the others.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use super::events::ServerEvent;

/// One live transport session. Owned by the registry for its lifetime.
struct ConnectionEntry {
    user_id: String,
    sender: mpsc::UnboundedSender<ServerEvent>,
    /// Per-connection outbound sequence counter.
    seq: AtomicU64,
    opened_at: DateTime<Utc>,
}

/// Registry of all live connections, indexed by connection ID and by user.
pub struct ConnectionRegistry {
    connections: DashMap<String, ConnectionEntry>,
    by_user: DashMap<String, Mutex<HashSet<String>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            by_user: DashMap::new(),
        }
    }

    /// Register a live connection. Returns `true` if this is the user's
    /// first live connection (the offline→online edge). Re-registering an
    /// existing connection ID is a no-op.
    pub fn register(
        &self,
        user_id: &str,
        connection_id: &str,
        sender: mpsc::UnboundedSender<ServerEvent>,
    ) -> bool {
        if self.connections.contains_key(connection_id) {
            return false;
        }
        self.connections.insert(
            connection_id.to_string(),
            ConnectionEntry {
                user_id: user_id.to_string(),
                sender,
                seq: AtomicU64::new(0),
                opened_at: Utc::now(),
            },
        );

        let set = self
            .by_user
            .entry(user_id.to_string())
            .or_insert_with(|| Mutex::new(HashSet::new()));
        let mut live = set.lock();
        let was_empty = live.is_empty();
        live.insert(connection_id.to_string());
        was_empty
    }

    /// Remove a connection. Returns `true` if the user's live set became
    /// empty (the online→offline edge). Unknown IDs are a no-op —
    /// disconnects can race with cleanup.
    pub fn unregister(&self, user_id: &str, connection_id: &str) -> bool {
        let Some((_, entry)) = self.connections.remove(connection_id) else {
            return false;
        };
        tracing::debug!(
            %connection_id,
            opened_at = %entry.opened_at,
            "connection removed"
        );
        let became_empty = match self.by_user.get(user_id) {
            Some(set) => {
                let mut live = set.lock();
                live.remove(connection_id);
                live.is_empty()
            }
            None => false,
        };
        if became_empty {
            self.by_user
                .remove_if(user_id, |_, set| set.lock().is_empty());
        }
        became_empty
    }

    /// Snapshot of the user's live connection IDs. Empty means offline.
    pub fn connections_of(&self, user_id: &str) -> Vec<String> {
        self.by_user
            .get(user_id)
            .map(|set| set.lock().iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Best-effort push to one connection. Returns `false` when the
    /// connection is gone or its queue is closed; the caller logs and moves
    /// on — a failed push is never retried here.
    pub fn push(&self, connection_id: &str, event: &'static str, data: Value) -> bool {
        let Some(entry) = self.connections.get(connection_id) else {
            return false;
        };
        let seq = entry.seq.fetch_add(1, Ordering::Relaxed) + 1;
        entry
            .sender
            .send(ServerEvent { event, seq, data })
            .is_ok()
    }

    /// Push to every live connection of one user. Returns how many pushes
    /// were enqueued.
    pub fn push_to_user(&self, user_id: &str, event: &'static str, data: &Value) -> usize {
        self.push_to_user_except(user_id, None, event, data)
    }

    /// Push to every live connection of one user except `excluded` (the
    /// originating device of a send, which must not receive its own ack).
    pub fn push_to_user_except(
        &self,
        user_id: &str,
        excluded: Option<&str>,
        event: &'static str,
        data: &Value,
    ) -> usize {
        let mut enqueued = 0;
        for connection_id in self.connections_of(user_id) {
            if excluded == Some(connection_id.as_str()) {
                continue;
            }
            if self.push(&connection_id, event, data.clone()) {
                enqueued += 1;
            } else {
                tracing::debug!(%connection_id, %user_id, event, "push to live connection failed");
            }
        }
        enqueued
    }

    /// Push to every live connection of every user except `user_id`'s own.
    /// Used for presence announcements.
    pub fn broadcast_except_user(&self, user_id: &str, event: &'static str, data: &Value) {
        let targets: Vec<String> = self
            .connections
            .iter()
            .filter(|entry| entry.value().user_id != user_id)
            .map(|entry| entry.key().clone())
            .collect();
        for connection_id in targets {
            if !self.push(&connection_id, event, data.clone()) {
                tracing::debug!(%connection_id, event, "broadcast push failed");
            }
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
