use std::{fs, path::Path};

use anyhow::Context;
use serde::Deserialize;
use tracing::warn;

pub const DEFAULT_CONFIG_FILE: &str = "client.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    pub heartbeat_period_secs: i64,
    pub typing_idle_timeout_secs: u64,
    pub max_group_chat_participants: usize,
    pub database_url: String,
    pub signaling_peer: Option<String>,
    pub local_bind: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            heartbeat_period_secs: 60,
            typing_idle_timeout_secs: 15,
            max_group_chat_participants: 10,
            database_url: "sqlite://./data/session.db".into(),
            signaling_peer: None,
            local_bind: "0.0.0.0:0".into(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileSettings {
    heartbeat_period_secs: Option<i64>,
    typing_idle_timeout_secs: Option<u64>,
    max_group_chat_participants: Option<usize>,
    database_url: Option<String>,
    signaling_peer: Option<String>,
    local_bind: Option<String>,
}

/// Defaults, then `client.toml` in the working directory, then the environment.
pub fn load_settings() -> Settings {
    load_settings_from(Path::new(DEFAULT_CONFIG_FILE))
}

pub fn load_settings_from(path: &Path) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        if let Err(err) = apply_file_overrides(&mut settings, &raw) {
            warn!(path = %path.display(), error = %format!("{err:#}"), "config: ignoring unreadable file");
        }
    }

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings.database_url = normalize_database_url(&settings.database_url);
    settings
}

fn apply_file_overrides(settings: &mut Settings, raw: &str) -> anyhow::Result<()> {
    let file_cfg: FileSettings = toml::from_str(raw).context("failed to parse config file")?;

    if let Some(v) = file_cfg.heartbeat_period_secs {
        settings.heartbeat_period_secs = v;
    }
    if let Some(v) = file_cfg.typing_idle_timeout_secs {
        settings.typing_idle_timeout_secs = v;
    }
    if let Some(v) = file_cfg.max_group_chat_participants {
        settings.max_group_chat_participants = v;
    }
    if let Some(v) = file_cfg.database_url {
        settings.database_url = v;
    }
    if let Some(v) = file_cfg.signaling_peer {
        settings.signaling_peer = Some(v);
    }
    if let Some(v) = file_cfg.local_bind {
        settings.local_bind = v;
    }
    Ok(())
}

/// Each key is read plain and with the `APP__` prefix; the prefixed one wins.
fn apply_env_overrides(settings: &mut Settings, var: impl Fn(&str) -> Option<String>) {
    let lookup = |key: &str| var(&format!("APP__{key}")).or_else(|| var(key));

    if let Some(v) = lookup("HEARTBEAT_PERIOD_SECS") {
        match v.parse::<i64>() {
            Ok(parsed) => settings.heartbeat_period_secs = parsed,
            Err(_) => warn!(value = %v, "config: HEARTBEAT_PERIOD_SECS is not an integer"),
        }
    }
    if let Some(v) = lookup("TYPING_IDLE_TIMEOUT_SECS") {
        match v.parse::<u64>() {
            Ok(parsed) => settings.typing_idle_timeout_secs = parsed,
            Err(_) => warn!(value = %v, "config: TYPING_IDLE_TIMEOUT_SECS is not an integer"),
        }
    }
    if let Some(v) = lookup("MAX_GROUP_CHAT_PARTICIPANTS") {
        match v.parse::<usize>() {
            Ok(parsed) => settings.max_group_chat_participants = parsed,
            Err(_) => warn!(value = %v, "config: MAX_GROUP_CHAT_PARTICIPANTS is not an integer"),
        }
    }
    if let Some(v) = lookup("DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = lookup("SIGNALING_PEER") {
        settings.signaling_peer = Some(v);
    }
    if let Some(v) = lookup("LOCAL_BIND") {
        settings.local_bind = v;
    }
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:") || raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        return format!("sqlite://{}", path.replace('\\', "/"));
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
