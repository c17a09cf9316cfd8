/// Relay API configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Worker ID embedded in generated snowflake message IDs.
    pub worker_id: u16,
    /// Minimum gap between relayed typing signals per (user, chat), in ms.
    pub typing_window_ms: u64,
    /// Maximum characters kept in `chat:update` message previews.
    pub preview_chars: usize,
    /// Seconds a fresh connection gets to send `identify` before the
    /// gateway closes it.
    pub handshake_timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment variables. Every variable has a
    /// default, so a bare environment gets a runnable service.
    pub fn from_env() -> Self {
        Self {
            port: parsed_var("PORT", 4010),
            worker_id: parsed_var("WORKER_ID", 0),
            typing_window_ms: parsed_var("TYPING_WINDOW_MS", 2000),
            preview_chars: parsed_var("PREVIEW_CHARS", 80),
            handshake_timeout_secs: parsed_var("HANDSHAKE_TIMEOUT_SECS", 10),
        }
    }
}

fn parsed_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
