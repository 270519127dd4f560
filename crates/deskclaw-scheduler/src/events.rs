//! Structured scheduler events and critical-failure alerts.
//!
//! Every dispatch outcome is published on a broadcast bus so the gateway,
//! a dashboard, or a log tail can watch the loop without touching it.
//! Slow subscribers just miss events — the loop never blocks on a
//! consumer.

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;

/// Emitted once per dispatch outcome.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerEvent {
    /// "schedule.fired" or "schedule.failed".
    pub kind: String,
    pub entry_id: String,
    /// inject | spawn | exec
    pub action_kind: String,
    /// success | failure
    pub status: String,
    /// RFC3339, UTC.
    pub timestamp: String,
}

/// Broadcast bus for scheduler events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SchedulerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.tx.subscribe()
    }

    /// Publish an event; returns it for further routing (alerts).
    pub fn emit(
        &self,
        kind: &str,
        entry_id: &str,
        action_kind: &str,
        status: &str,
    ) -> SchedulerEvent {
        let event = SchedulerEvent {
            kind: kind.to_string(),
            entry_id: entry_id.to_string(),
            action_kind: action_kind.to_string(),
            status: status.to_string(),
            timestamp: Utc::now().to_rfc3339(),
        };
        tracing::debug!("📣 {} {} ({})", event.kind, event.entry_id, event.status);
        // No subscribers is fine.
        let _ = self.tx.send(event.clone());
        event
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Deliver a critical-failure alert to the configured webhook. Failures
/// here are logged, never propagated — alerting must not be able to
/// break the loop.
pub async fn send_alert_webhook(url: &str, event: &SchedulerEvent, reason: &str) {
    let client = reqwest::Client::new();
    let resp = client
        .post(url)
        .json(&serde_json::json!({
            "level": "alert",
            "kind": event.kind,
            "entry_id": event.entry_id,
            "action_kind": event.action_kind,
            "status": event.status,
            "reason": reason,
            "timestamp": event.timestamp,
        }))
        .timeout(std::time::Duration::from_secs(10))
        .send()
        .await;

    match resp {
        Ok(r) if r.status().is_success() => {
            tracing::info!("✅ Alert delivered for entry {}", event.entry_id);
        }
        Ok(r) => tracing::warn!("⚠️ Alert webhook returned {}", r.status()),
        Err(e) => tracing::warn!("⚠️ Alert webhook failed: {e}"),
    }
}
