use std::time::Duration;

use tracing::warn;

/// Where the platform lives and how hard to hold on to the realtime socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Base URL for `/rpc/{procedure}` and `/rest/{table}`.
    pub api_url: String,
    /// WebSocket endpoint for push notifications.
    pub realtime_url: String,
    /// Sent as a bearer token when set.
    pub api_key: Option<String>,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
    /// Interval between client heartbeats. Two unanswered in a row drop the socket.
    pub heartbeat: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self::new("http://127.0.0.1:8080")
    }
}

impl RemoteConfig {
    /// Defaults for `api_url`, with the realtime endpoint derived from it.
    pub fn new(api_url: &str) -> Self {
        let api_url = api_url.trim_end_matches('/').to_string();
        Self {
            realtime_url: realtime_url_for(&api_url),
            api_url,
            api_key: None,
            reconnect_base: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(30),
            heartbeat: Duration::from_secs(15),
        }
    }

    /// Reads `CIVIC_API_URL`, `CIVIC_REALTIME_URL`, `CIVIC_API_KEY`,
    /// `CIVIC_RECONNECT_BASE_MS`, `CIVIC_RECONNECT_MAX_MS` and
    /// `CIVIC_HEARTBEAT_SECS`. Unset or unparseable values keep the defaults.
    pub fn from_env() -> Self {
        let mut config = match std::env::var("CIVIC_API_URL") {
            Ok(url) if !url.trim().is_empty() => Self::new(url.trim()),
            _ => Self::default(),
        };

        if let Ok(url) = std::env::var("CIVIC_REALTIME_URL") {
            if !url.trim().is_empty() {
                config.realtime_url = url.trim().to_string();
            }
        }
        config.api_key = std::env::var("CIVIC_API_KEY").ok().filter(|k| !k.is_empty());

        if let Some(ms) = env_number("CIVIC_RECONNECT_BASE_MS") {
            config.reconnect_base = Duration::from_millis(ms);
        }
        if let Some(ms) = env_number("CIVIC_RECONNECT_MAX_MS") {
            config.reconnect_max = Duration::from_millis(ms);
        }
        if let Some(secs) = env_number("CIVIC_HEARTBEAT_SECS").filter(|s| *s > 0) {
            config.heartbeat = Duration::from_secs(secs);
        }

        if config.reconnect_max < config.reconnect_base {
            warn!("CIVIC_RECONNECT_MAX_MS below base delay, using base as cap");
            config.reconnect_max = config.reconnect_base;
        }
        config
    }
}

fn env_number(key: &str) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(n) => Some(n),
        Err(_) => {
            warn!("Ignoring {}='{}'", key, raw);
            None
        }
    }
}

/// `http(s)://host/x` becomes `ws(s)://host/x/realtime`.
pub fn realtime_url_for(api_url: &str) -> String {
    let ws = api_url
        .replacen("https://", "wss://", 1)
        .replacen("http://", "ws://", 1);
    format!("{}/realtime", ws.trim_end_matches('/'))
}

/// Delay before reconnect attempt `attempt` (1-based): doubles from `base`,
/// capped at `max`. Attempt 0 retries immediately.
pub fn compute_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let base_ms = base.as_millis() as u64;
    let max_ms = max.as_millis() as u64;
    let multiplier = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
    let delay_ms = base_ms.saturating_mul(multiplier).min(max_ms);

    Duration::from_millis(delay_ms)
}
