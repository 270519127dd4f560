//! Action dispatch — routes a due entry to its executor.
//!
//! All three branches convert their failures into `Outcome::Failure`; a
//! bad entry must never take the loop down. Every dispatch is bounded by
//! the configured timeout, so a hung tmux server or a stuck job reads as
//! `failure("timeout")` instead of a stalled tick.

use std::sync::Arc;
use std::time::Duration;

use deskclaw_session::SessionBridge;

use crate::registry::JobRegistry;
use crate::schedule::{ScheduleAction, ScheduleEntry};

/// Origin marker attached to injected text.
pub const SOURCE_TAG: &str = "schedule";

/// Result of dispatching one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Outcome::Failure(reason.into())
    }
}

/// What to do when a spawn hits an already-running role session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnPolicy {
    /// Refuse the spawn — one session per role.
    Single,
    /// Start another session under a numeric suffix.
    Multi,
}

impl SpawnPolicy {
    /// Config values: "single" (default) or "multi".
    pub fn from_config(value: &str) -> Self {
        match value {
            "multi" => SpawnPolicy::Multi,
            _ => SpawnPolicy::Single,
        }
    }
}

/// Routes due entries to the session bridge or the job registry.
pub struct Dispatcher {
    bridge: Arc<dyn SessionBridge>,
    jobs: Arc<JobRegistry>,
    spawn_policy: SpawnPolicy,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        bridge: Arc<dyn SessionBridge>,
        jobs: Arc<JobRegistry>,
        spawn_policy: SpawnPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            bridge,
            jobs,
            spawn_policy,
            timeout,
        }
    }

    /// Dispatch one entry. Never propagates an error — the outcome carries
    /// the failure reason.
    pub async fn dispatch(&self, entry: &ScheduleEntry) -> Outcome {
        match tokio::time::timeout(self.timeout, self.dispatch_inner(entry)).await {
            Ok(outcome) => outcome,
            Err(_) => Outcome::failure("timeout"),
        }
    }

    async fn dispatch_inner(&self, entry: &ScheduleEntry) -> Outcome {
        match &entry.action {
            ScheduleAction::Inject { target } => self.inject(target, &entry.payload).await,
            ScheduleAction::Spawn { role } => self.spawn(role, &entry.payload).await,
            ScheduleAction::Exec { job } => self.exec(job, &entry.payload).await,
        }
    }

    async fn inject(&self, target: &str, payload: &str) -> Outcome {
        match self.bridge.exists(target).await {
            Ok(true) => {}
            Ok(false) => return Outcome::failure("target not found"),
            Err(e) => return Outcome::failure(format!("target check failed: {e}")),
        }
        match self.bridge.send(target, payload, SOURCE_TAG).await {
            Ok(()) => Outcome::Success,
            Err(e) => Outcome::failure(format!("send failed: {e}")),
        }
    }

    async fn spawn(&self, role: &str, payload: &str) -> Outcome {
        let base = self.bridge.session_name(role);
        let name = match self.bridge.exists(&base).await {
            Ok(false) => base,
            Ok(true) => match self.spawn_policy {
                SpawnPolicy::Single => {
                    return Outcome::failure(format!("session '{base}' already running"));
                }
                SpawnPolicy::Multi => match self.free_suffix(&base).await {
                    Ok(name) => name,
                    Err(reason) => return Outcome::Failure(reason),
                },
            },
            Err(e) => return Outcome::failure(format!("session check failed: {e}")),
        };
        match self.bridge.spawn(&name, role, payload).await {
            Ok(_) => Outcome::Success,
            Err(e) => Outcome::failure(format!("spawn failed: {e}")),
        }
    }

    async fn free_suffix(&self, base: &str) -> Result<String, String> {
        for n in 2..=9 {
            let candidate = format!("{base}-{n}");
            match self.bridge.exists(&candidate).await {
                Ok(false) => return Ok(candidate),
                Ok(true) => continue,
                Err(e) => return Err(format!("session check failed: {e}")),
            }
        }
        Err(format!("no free session name for '{base}'"))
    }

    async fn exec(&self, job_name: &str, payload: &str) -> Outcome {
        let Some(job) = self.jobs.get(job_name) else {
            return Outcome::failure(format!("unknown job '{job_name}'"));
        };
        let payload = payload.to_string();
        // Jobs are synchronous by contract; run them off the loop's thread.
        match tokio::task::spawn_blocking(move || job.run(&payload)).await {
            Ok(Ok(())) => Outcome::Success,
            Ok(Err(reason)) => Outcome::Failure(reason),
            Err(e) => Outcome::failure(format!("job panicked: {e}")),
        }
    }
}
