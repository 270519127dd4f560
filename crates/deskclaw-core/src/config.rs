//! deskclaw configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{DeskclawError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeskclawConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

impl Default for DeskclawConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            session: SessionConfig::default(),
            gateway: GatewayConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

impl DeskclawConfig {
    /// Load config from the default path (~/.deskclaw/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DeskclawError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| DeskclawError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| DeskclawError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the deskclaw home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".deskclaw")
    }
}

/// Scheduler loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Path to the human-edited schedule file. The file is the source of
    /// truth: entries live only as long as they appear in it.
    #[serde(default = "default_schedule_path")]
    pub schedule_path: String,
    /// Poll interval in seconds.
    #[serde(default = "default_poll_secs")]
    pub poll_secs: u64,
    /// Per-dispatch timeout in seconds. A hung tmux call or job counts as a
    /// dispatch failure, not a stalled loop.
    #[serde(default = "default_dispatch_timeout_secs")]
    pub dispatch_timeout_secs: u64,
    /// SQLite execution history path.
    #[serde(default = "default_history_db")]
    pub history_db: String,
    /// Spawn conflict policy: "single" refuses to spawn when the role's
    /// session already runs, "multi" starts another under a suffixed name.
    #[serde(default = "default_spawn_policy")]
    pub spawn_policy: String,
}

fn default_schedule_path() -> String { "~/.deskclaw/schedule.md".into() }
fn default_poll_secs() -> u64 { 60 }
fn default_dispatch_timeout_secs() -> u64 { 10 }
fn default_history_db() -> String { "~/.deskclaw/history.db".into() }
fn default_spawn_policy() -> String { "single".into() }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            schedule_path: default_schedule_path(),
            poll_secs: default_poll_secs(),
            dispatch_timeout_secs: default_dispatch_timeout_secs(),
            history_db: default_history_db(),
            spawn_policy: default_spawn_policy(),
        }
    }
}

/// Terminal-multiplexer (tmux) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// tmux binary to invoke.
    #[serde(default = "default_tmux_bin")]
    pub tmux_bin: String,
    /// Prefix for assistant session names ("desk" → "desk-chief").
    #[serde(default = "default_session_prefix")]
    pub session_prefix: String,
    /// Command launched inside a freshly spawned session.
    #[serde(default = "default_spawn_command")]
    pub spawn_command: String,
    /// Timeout for a single tmux call, in seconds.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

fn default_tmux_bin() -> String { "tmux".into() }
fn default_session_prefix() -> String { "desk".into() }
fn default_spawn_command() -> String { "assistant".into() }
fn default_command_timeout_secs() -> u64 { 5 }

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tmux_bin: default_tmux_bin(),
            session_prefix: default_session_prefix(),
            spawn_command: default_spawn_command(),
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

/// Control API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Bind host. Loopback by default — deskclaw is a single-operator tool.
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn bool_true() -> bool { true }
fn default_host() -> String { "127.0.0.1".into() }
fn default_port() -> u16 { 7717 }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: bool_true(),
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Outbound notification configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Webhook URL for critical-failure alerts. Empty disables alerting.
    #[serde(default)]
    pub webhook_url: String,
}
