//! deskclaw error type — one enum shared across the workspace.

use thiserror::Error;

/// Workspace-wide result alias.
pub type Result<T> = std::result::Result<T, DeskclawError>;

/// Errors surfaced across deskclaw crates.
#[derive(Debug, Error)]
pub enum DeskclawError {
    /// Configuration file problems (unreadable, unparseable).
    #[error("config error: {0}")]
    Config(String),

    /// Schedule file problems (unreadable on startup, unknown entry).
    #[error("schedule error: {0}")]
    Schedule(String),

    /// Execution history store problems.
    #[error("history error: {0}")]
    History(String),

    /// Session bridge problems (tmux unavailable, call failed or timed out).
    #[error("session error: {0}")]
    Session(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
