use tracing::warn;

/// Engine behaviour switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Reload once the realtime subscription comes back after a disconnect,
    /// to pick up inserts that happened while no notifications arrived.
    pub reload_on_reconnect: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reload_on_reconnect: true,
        }
    }
}

impl SyncConfig {
    /// Reads `CIVIC_RELOAD_ON_RECONNECT`; unset or unparseable keeps the default.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var("CIVIC_RELOAD_ON_RECONNECT") {
            match parse_flag(&raw) {
                Some(flag) => config.reload_on_reconnect = flag,
                None => warn!("Ignoring CIVIC_RELOAD_ON_RECONNECT='{}'", raw),
            }
        }
        config
    }
}

pub(crate) fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
