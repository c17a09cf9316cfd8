//! Per-user presence: a two-state machine driven by registry edges.
//!
//! Presence is per-user, not per-connection. The tracker only ever reports
//! a change on an actual Offline→Online or Online→Offline transition; a
//! second device connecting while the user is already online is silent.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

struct PresenceRecord {
    online: bool,
    /// Set every time the user's last live connection closes.
    last_seen: Option<DateTime<Utc>>,
}

/// Presence state for every user seen by this process. Users with no record
/// are offline with no last-seen.
pub struct PresenceTracker {
    users: DashMap<String, PresenceRecord>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
        }
    }

    /// Drive the Offline→Online edge. Returns `true` exactly when the state
    /// actually changed; calling it for an already-online user is a no-op.
    pub fn set_online(&self, user_id: &str) -> bool {
        let mut record = self
            .users
            .entry(user_id.to_string())
            .or_insert_with(|| PresenceRecord {
                online: false,
                last_seen: None,
            });
        if record.online {
            return false;
        }
        record.online = true;
        true
    }

    /// Drive the Online→Offline edge, recording `at` as the user's
    /// last-seen timestamp. Returns `true` exactly on an actual transition.
    pub fn set_offline(&self, user_id: &str, at: DateTime<Utc>) -> bool {
        let Some(mut record) = self.users.get_mut(user_id) else {
            return false;
        };
        if !record.online {
            return false;
        }
        record.online = false;
        record.last_seen = Some(at);
        true
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.users.get(user_id).map(|r| r.online).unwrap_or(false)
    }

    pub fn last_seen(&self, user_id: &str) -> Option<DateTime<Utc>> {
        self.users.get(user_id).and_then(|r| r.last_seen)
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}
