//! # deskclaw-session
//! Thin bridge to the terminal-multiplexer layer where assistant sessions
//! live. The scheduler asks exactly three things of it: does a session
//! exist, send text into one, create a new one. Session lifecycle stays
//! owned by the multiplexer — this crate never kills or tracks sessions.

pub mod tmux;

pub use tmux::TmuxBridge;

use async_trait::async_trait;
use deskclaw_core::error::Result;

/// Result of spawning a new assistant session.
#[derive(Debug, Clone)]
pub struct SpawnedSession {
    /// Multiplexer session name the new assistant lives in.
    pub session_id: String,
}

/// Interface to the session layer.
#[async_trait]
pub trait SessionBridge: Send + Sync {
    /// Canonical session name for a role ("chief" → "desk-chief").
    fn session_name(&self, role: &str) -> String;

    /// Whether the target session exists and is alive.
    async fn exists(&self, target: &str) -> Result<bool>;

    /// Send text into the target session's input, tagged with its origin so
    /// the receiving assistant can tell scheduler input from operator input.
    async fn send(&self, target: &str, text: &str, source_tag: &str) -> Result<()>;

    /// Launch a new session under `name` for the given role. The payload is
    /// handed off through the session environment.
    async fn spawn(&self, name: &str, role: &str, payload: &str) -> Result<SpawnedSession>;
}
