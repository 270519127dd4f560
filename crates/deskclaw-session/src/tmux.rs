//! tmux-backed session bridge.
//!
//! Every call shells out to the tmux binary and is time-bounded, so a hung
//! tmux server surfaces as a session error instead of stalling the caller.
//! Commands used: `has-session`, `send-keys`, `new-session` (with `-e`,
//! tmux ≥ 3.2).

use std::ffi::OsStr;
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use deskclaw_core::config::SessionConfig;
use deskclaw_core::error::{DeskclawError, Result};

use crate::{SessionBridge, SpawnedSession};

/// Bridge to a local tmux server.
pub struct TmuxBridge {
    tmux_bin: String,
    session_prefix: String,
    spawn_command: String,
    timeout: Duration,
}

impl TmuxBridge {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            tmux_bin: config.tmux_bin.clone(),
            session_prefix: config.session_prefix.clone(),
            spawn_command: config.spawn_command.clone(),
            timeout: Duration::from_secs(config.command_timeout_secs.max(1)),
        }
    }

    /// Prefix injected text with its origin marker.
    pub fn tagged(text: &str, source_tag: &str) -> String {
        format!("[{source_tag}] {text}")
    }

    /// Run one tmux command, bounded by the configured timeout.
    async fn tmux<I, S>(&self, args: I) -> Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let fut = Command::new(&self.tmux_bin).args(args).output();
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(DeskclawError::Session(format!("tmux failed to run: {e}"))),
            Err(_) => Err(DeskclawError::Session("tmux call timed out".into())),
        }
    }

    fn check(output: Output, action: &str) -> Result<()> {
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(DeskclawError::Session(format!(
                "tmux {action} failed: {}",
                stderr.trim()
            )))
        }
    }
}

#[async_trait]
impl SessionBridge for TmuxBridge {
    fn session_name(&self, role: &str) -> String {
        format!("{}-{}", self.session_prefix, role)
    }

    async fn exists(&self, target: &str) -> Result<bool> {
        // "=" pins tmux to an exact-name match instead of prefix matching.
        let exact = format!("={target}");
        let output = self
            .tmux(["has-session", "-t", exact.as_str()])
            .await?;
        Ok(output.status.success())
    }

    async fn send(&self, target: &str, text: &str, source_tag: &str) -> Result<()> {
        let tagged = Self::tagged(text, source_tag);
        // Two calls: "-l" keeps the payload literal (never parsed as key
        // names), then a separate Enter submits it.
        let output = self
            .tmux(["send-keys", "-t", target, "-l", tagged.as_str()])
            .await?;
        Self::check(output, "send-keys")?;
        let output = self.tmux(["send-keys", "-t", target, "Enter"]).await?;
        Self::check(output, "send-keys")?;
        tracing::debug!("💬 Injected {} chars into {target}", tagged.len());
        Ok(())
    }

    async fn spawn(&self, name: &str, role: &str, payload: &str) -> Result<SpawnedSession> {
        let role_env = format!("DESK_ROLE={role}");
        let handoff_env = format!("DESK_HANDOFF={payload}");
        let output = self
            .tmux([
                "new-session",
                "-d",
                "-s",
                name,
                "-e",
                role_env.as_str(),
                "-e",
                handoff_env.as_str(),
                self.spawn_command.as_str(),
            ])
            .await?;
        Self::check(output, "new-session")?;
        tracing::info!("🚀 Spawned session '{name}' for role '{role}'");
        Ok(SpawnedSession {
            session_id: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_name() {
        let bridge = TmuxBridge::new(&SessionConfig::default());
        assert_eq!(bridge.session_name("chief"), "desk-chief");
    }

    #[test]
    fn test_tagged_marker() {
        assert_eq!(
            TmuxBridge::tagged("check status", "schedule"),
            "[schedule] check status"
        );
    }
}
