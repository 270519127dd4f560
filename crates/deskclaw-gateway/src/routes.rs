//! API route handlers for the control gateway.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use serde_json::{Value, json};

use deskclaw_scheduler::Outcome;

use super::server::AppState;

/// Health check endpoint.
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "deskclaw-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Scheduler status: uptime, counts, and schedule file problems. Parse
/// issues surface here because the file is the primary authoring
/// interface — a log line is not enough.
pub async fn status(State(state): State<Arc<AppState>>) -> Json<Value> {
    let entries = state.scheduler.entries();
    let issues = state.scheduler.issues();
    Json(json!({
        "ok": true,
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "entries": entries.len(),
        "enabled_entries": entries.iter().filter(|(_, enabled)| *enabled).count(),
        "parse_issues": issues,
        "read_error": state.scheduler.read_error(),
    }))
}

/// List schedule entries with their effective enabled state.
pub async fn list_entries(State(state): State<Arc<AppState>>) -> Json<Value> {
    let entries: Vec<Value> = state
        .scheduler
        .entries()
        .iter()
        .map(|(entry, enabled)| {
            json!({
                "id": entry.id,
                "expression": entry.expression,
                "action": entry.action.kind(),
                "target": entry.action.target(),
                "payload": entry.payload,
                "critical": entry.critical,
                "enabled": enabled,
                "line": entry.line,
            })
        })
        .collect();
    Json(json!({ "ok": true, "entries": entries }))
}

#[derive(Deserialize)]
pub struct ExecutionsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// Recent executions, most recent first.
pub async fn list_executions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ExecutionsQuery>,
) -> Json<Value> {
    match state.scheduler.history().recent(query.limit) {
        Ok(executions) => Json(json!({ "ok": true, "executions": executions })),
        Err(e) => Json(json!({ "ok": false, "error": e })),
    }
}

/// Enable an entry without editing the schedule file.
pub async fn enable_entry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<Value> {
    Json(toggle(&state, &id, true))
}

/// Disable an entry without editing the schedule file.
pub async fn disable_entry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<Value> {
    Json(toggle(&state, &id, false))
}

fn toggle(state: &AppState, id: &str, enabled: bool) -> Value {
    if state.scheduler.set_enabled(id, enabled) {
        json!({ "ok": true, "id": id, "enabled": enabled })
    } else {
        json!({ "ok": false, "error": format!("unknown entry '{id}'") })
    }
}

/// Trigger an entry immediately. Goes through the same dedup/record path
/// as the poll loop — a manual run within an already-fired minute reports
/// a failure instead of double-firing.
pub async fn run_entry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<Value> {
    match state.scheduler.run_now(&id).await {
        Ok(Outcome::Success) => Json(json!({ "ok": true, "status": "success" })),
        Ok(Outcome::Failure(reason)) => {
            Json(json!({ "ok": true, "status": "failure", "reason": reason }))
        }
        Err(e) => Json(json!({ "ok": false, "error": e.to_string() })),
    }
}

/// Hide an entry until the schedule file changes.
pub async fn remove_entry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<Value> {
    if state.scheduler.remove(&id) {
        Json(json!({ "ok": true, "id": id }))
    } else {
        Json(json!({ "ok": false, "error": format!("unknown entry '{id}'") }))
    }
}
