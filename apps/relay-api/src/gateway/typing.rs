//! Typing indicator relay: ephemeral, at-most-once, rate-limited.
//!
//! Nothing is persisted and nothing is retried. The receiver UI expires the
//! indicator on its own; the relay's only state is a per-(user, chat) stamp
//! used to drop floods of repeated signals.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::json;

use crate::chat::ChatKey;

use super::events::EventName;
use super::registry::ConnectionRegistry;

pub struct TypingRelay {
    registry: Arc<ConnectionRegistry>,
    window: Duration,
    last_signal: DashMap<(String, String), Instant>,
}

impl TypingRelay {
    pub fn new(registry: Arc<ConnectionRegistry>, window: Duration) -> Self {
        Self {
            registry,
            window,
            last_signal: DashMap::new(),
        }
    }

    /// Relay a typing signal to the other participant's live connections.
    /// Returns `true` if the signal was relayed; non-participants and
    /// signals inside the rate window are dropped silently.
    pub fn notify(&self, user_id: &str, chat_key: &ChatKey) -> bool {
        let Some(peer) = chat_key.other(user_id) else {
            return false;
        };

        let key = (user_id.to_string(), chat_key.to_string());
        let now = Instant::now();
        match self.last_signal.entry(key) {
            Entry::Occupied(mut entry) => {
                if now.duration_since(*entry.get()) < self.window {
                    return false;
                }
                entry.insert(now);
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
            }
        }

        let data = json!({ "chatKey": chat_key, "userId": user_id });
        self.registry.push_to_user(peer, EventName::TYPING, &data);
        true
    }

    /// Drop stamps older than `max_age`. Memory cleanup only — an expired
    /// stamp and a missing stamp admit the next signal equally. Counted
    /// inside the sweep because `notify` keeps inserting while it runs.
    pub fn prune(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let mut pruned = 0;
        self.last_signal.retain(|_, stamp| {
            let keep = now.duration_since(*stamp) < max_age;
            if !keep {
                pruned += 1;
            }
            keep
        });
        pruned
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::super::events::ServerEvent;
    use super::*;

    fn setup(window_ms: u64) -> (TypingRelay, Arc<ConnectionRegistry>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let relay = TypingRelay::new(registry.clone(), Duration::from_millis(window_ms));
        (relay, registry)
    }

    fn connect(
        registry: &ConnectionRegistry,
        user: &str,
        conn: &str,
    ) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register(user, conn, tx);
        rx
    }

    #[test]
    fn typing_reaches_peer_connections_only() {
        let (relay, registry) = setup(2000);
        let chat = ChatKey::new("usr_a", "usr_b").unwrap();
        let mut rx_a = connect(&registry, "usr_a", "conn_a");
        let mut rx_b = connect(&registry, "usr_b", "conn_b");

        assert!(relay.notify("usr_a", &chat));

        let ev = rx_b.try_recv().unwrap();
        assert_eq!(ev.event, "typing");
        assert_eq!(ev.data["userId"], "usr_a");
        assert!(rx_a.try_recv().is_err(), "no echo to the typer");
    }

    #[test]
    fn rapid_repeats_are_dropped() {
        let (relay, registry) = setup(2000);
        let chat = ChatKey::new("usr_a", "usr_b").unwrap();
        let mut rx_b = connect(&registry, "usr_b", "conn_b");

        let mut relayed = 0;
        for _ in 0..20 {
            if relay.notify("usr_a", &chat) {
                relayed += 1;
            }
        }
        assert_eq!(relayed, 1, "flood collapses to a single relayed signal");

        let mut received = 0;
        while rx_b.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 1);
    }

    #[test]
    fn window_is_per_user_and_per_chat() {
        let (relay, registry) = setup(2000);
        let ab = ChatKey::new("usr_a", "usr_b").unwrap();
        let ac = ChatKey::new("usr_a", "usr_c").unwrap();
        let _rx_b = connect(&registry, "usr_b", "conn_b");
        let _rx_c = connect(&registry, "usr_c", "conn_c");

        assert!(relay.notify("usr_a", &ab));
        // Different chat: independent window.
        assert!(relay.notify("usr_a", &ac));
        // Different user, same chat: independent window.
        assert!(relay.notify("usr_b", &ab));
    }

    #[test]
    fn non_participant_signal_is_dropped() {
        let (relay, registry) = setup(2000);
        let chat = ChatKey::new("usr_a", "usr_b").unwrap();
        let mut rx_b = connect(&registry, "usr_b", "conn_b");

        assert!(!relay.notify("usr_c", &chat));
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn zero_window_relays_every_signal() {
        let (relay, registry) = setup(0);
        let chat = ChatKey::new("usr_a", "usr_b").unwrap();
        let _rx_b = connect(&registry, "usr_b", "conn_b");

        assert!(relay.notify("usr_a", &chat));
        assert!(relay.notify("usr_a", &chat));
    }

    #[test]
    fn prune_counts_removals_while_signals_keep_arriving() {
        let (relay, _registry) = setup(0);
        let relay = Arc::new(relay);

        let writer = {
            let relay = relay.clone();
            std::thread::spawn(move || {
                for i in 0..2_000 {
                    let chat = ChatKey::new("usr_a", &format!("usr_{i}")).unwrap();
                    relay.notify("usr_a", &chat);
                }
            })
        };
        // Sweeps race the inserts; fresh stamps all survive, so every pass
        // must report zero no matter how much the map grew mid-sweep.
        for _ in 0..200 {
            assert_eq!(relay.prune(Duration::from_secs(3600)), 0);
        }
        writer.join().unwrap();

        assert_eq!(relay.prune(Duration::ZERO), 2_000);
    }

    #[test]
    fn prune_clears_stale_stamps() {
        let (relay, _registry) = setup(2000);
        let chat = ChatKey::new("usr_a", "usr_b").unwrap();
        relay.notify("usr_a", &chat);

        assert_eq!(relay.prune(Duration::from_secs(3600)), 0);
        assert_eq!(relay.prune(Duration::ZERO), 1);
    }
}
