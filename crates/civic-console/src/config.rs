use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use civic_remote::RemoteConfig;
use civic_sync::SyncConfig;
use civic_types::models::{AuthorRole, ChannelType, Identity};

pub enum Backend {
    /// SQLite file at the given path.
    Local(PathBuf),
    Remote(RemoteConfig),
}

pub struct ConsoleConfig {
    pub backend: Backend,
    pub identity: Identity,
    pub channel_type: ChannelType,
    pub channel_id: String,
    pub sync: SyncConfig,
}

impl ConsoleConfig {
    pub fn from_env() -> Result<Self> {
        let backend = match var_or("CIVIC_BACKEND", "local").to_ascii_lowercase().as_str() {
            "local" => Backend::Local(PathBuf::from(var_or("CIVIC_DB_PATH", "civic.db"))),
            "remote" => Backend::Remote(RemoteConfig::from_env()),
            other => bail!("CIVIC_BACKEND must be 'local' or 'remote', got '{}'", other),
        };

        let role_name = var_or("CIVIC_USER_ROLE", "citizen");
        let role = AuthorRole::parse_lenient(&role_name)
            .with_context(|| format!("unknown CIVIC_USER_ROLE '{}'", role_name))?;
        let identity = Identity {
            user_id: var_or("CIVIC_USER_ID", "demo-citizen"),
            display_name: var_or("CIVIC_USER_NAME", "Demo Citizen"),
            role,
            avatar: None,
        };

        let channel_type: ChannelType = var_or("CIVIC_CHANNEL_TYPE", "COMPLAINT_PUBLIC")
            .parse()
            .context("invalid CIVIC_CHANNEL_TYPE")?;

        Ok(Self {
            backend,
            identity,
            channel_type,
            channel_id: var_or("CIVIC_CHANNEL_ID", "demo"),
            sync: SyncConfig::from_env(),
        })
    }
}

fn var_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}
