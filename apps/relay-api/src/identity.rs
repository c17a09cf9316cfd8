//! Identity seam: resolving transport tokens to authenticated user IDs.
//!
//! Token issuance lives with the platform's identity provider, not here.
//! The gateway only needs "this opaque token belongs to that user"; a
//! connection whose token does not resolve is rejected before it can
//! register.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve a transport token to a user ID, or `None` if it is invalid.
    async fn authenticate(&self, token: &str) -> Option<String>;
}

/// Fixed token table. Used in tests and local development, where tokens are
/// minted by the test itself rather than an external issuer.
pub struct StaticTokenProvider {
    tokens: Mutex<HashMap<String, String>>,
}

impl StaticTokenProvider {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Register a token for a user. Re-issuing overwrites the old mapping.
    pub fn issue(&self, token: impl Into<String>, user_id: impl Into<String>) {
        self.tokens.lock().insert(token.into(), user_id.into());
    }

    pub fn revoke(&self, token: &str) {
        self.tokens.lock().remove(token);
    }
}

impl Default for StaticTokenProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for StaticTokenProvider {
    async fn authenticate(&self, token: &str) -> Option<String> {
        self.tokens.lock().get(token).cloned()
    }
}

/// Development-only provider: a token of the form `usr_<ulid>` is accepted
/// as that user's ID. Stands in until the real identity service is wired
/// up, the way the in-memory store stands in for the document database.
pub struct PassthroughProvider;

#[async_trait]
impl IdentityProvider for PassthroughProvider {
    async fn authenticate(&self, token: &str) -> Option<String> {
        let rest = token.strip_prefix("usr_")?;
        if rest.is_empty() || !rest.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        Some(token.to_string())
    }
}
