//! The scheduler engine — polling loop, hot reload, and the control handle.
//!
//! The loop is one task: sleep until the next poll tick (or shutdown),
//! re-read the schedule if it changed, dispatch whatever is due for the
//! current minute, record every outcome. Per-entry failures are contained;
//! a history-store failure aborts the tick instead — dispatching without
//! an audit row risks a double fire, and correctness beats liveness there.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use sha2::{Digest, Sha256};
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;

use deskclaw_core::config::SchedulerConfig;
use deskclaw_core::error::{DeskclawError, Result};

use crate::dispatch::{Dispatcher, Outcome};
use crate::events::{self, EventBus};
use crate::history::{ExecStatus, HistoryStore, StartGuard};
use crate::schedule::{self, ParseIssue, ScheduleEntry};

const MIN_POLL_SECS: u64 = 5;

/// Mutable schedule state behind one short-lived lock.
struct ScheduleState {
    entries: Vec<ScheduleEntry>,
    issues: Vec<ParseIssue>,
    /// Runtime enable/disable overrides from the control API, by entry id.
    /// An override wins over the file flag in both directions.
    overrides: HashMap<String, bool>,
    /// Entries hidden via the control API. The file stays the source of
    /// truth: a removal lasts until the file itself changes.
    removed: HashSet<String>,
    /// Content hash of the last successfully parsed file.
    file_hash: Option<String>,
    /// Last re-read failure, if any — the entry set is stale but valid.
    read_error: Option<String>,
}

/// Handle to the scheduler. Explicitly passed to the loop, the gateway,
/// and anything else that needs it — no globals.
pub struct Scheduler {
    schedule_path: PathBuf,
    poll_secs: u64,
    state: Mutex<ScheduleState>,
    history: Arc<HistoryStore>,
    dispatcher: Dispatcher,
    bus: EventBus,
    stop: Notify,
    alert_webhook: Option<String>,
}

impl Scheduler {
    pub fn new(
        config: &SchedulerConfig,
        history: Arc<HistoryStore>,
        dispatcher: Dispatcher,
        bus: EventBus,
        alert_webhook: Option<String>,
    ) -> Self {
        Self {
            schedule_path: PathBuf::from(&config.schedule_path),
            poll_secs: config.poll_secs,
            state: Mutex::new(ScheduleState {
                entries: Vec::new(),
                issues: Vec::new(),
                overrides: HashMap::new(),
                removed: HashSet::new(),
                file_hash: None,
                read_error: None,
            }),
            history,
            dispatcher,
            bus,
            stop: Notify::new(),
            alert_webhook,
        }
    }

    /// Initial load. An unreadable schedule file on startup is fatal —
    /// running silently with an empty schedule is worse than not starting.
    pub fn load(&self) -> Result<()> {
        let content = std::fs::read_to_string(&self.schedule_path).map_err(|e| {
            DeskclawError::Schedule(format!(
                "cannot read schedule file {}: {e}",
                self.schedule_path.display()
            ))
        })?;
        self.install(&content);
        Ok(())
    }

    /// Parse and swap in a fresh entry set. Overrides and removals for ids
    /// that left the file are dropped with it.
    fn install(&self, content: &str) {
        let parsed = schedule::parse(content);
        for issue in &parsed.issues {
            tracing::warn!("⚠️ Schedule line {}: {}", issue.line, issue.message);
        }

        let mut state = self.state.lock().unwrap();
        let ids: HashSet<String> = parsed.entries.iter().map(|e| e.id.clone()).collect();
        state.overrides.retain(|id, _| ids.contains(id));
        state.removed.retain(|id| ids.contains(id));
        state.file_hash = Some(content_hash(content));
        state.read_error = None;
        tracing::info!(
            "📋 Schedule loaded: {} entries, {} issues",
            parsed.entries.len(),
            parsed.issues.len()
        );
        state.entries = parsed.entries;
        state.issues = parsed.issues;
    }

    /// Hot reload: re-read the schedule when its content changed. A read
    /// failure keeps the previous set — stale but valid.
    fn reload_if_changed(&self) {
        let content = match std::fs::read_to_string(&self.schedule_path) {
            Ok(content) => content,
            Err(e) => {
                let mut state = self.state.lock().unwrap();
                if state.read_error.is_none() {
                    tracing::warn!(
                        "⚠️ Schedule re-read failed, keeping {} stale entries: {e}",
                        state.entries.len()
                    );
                }
                state.read_error = Some(e.to_string());
                return;
            }
        };
        let changed = {
            let state = self.state.lock().unwrap();
            state.file_hash.as_deref() != Some(content_hash(&content).as_str())
        };
        if changed {
            self.install(&content);
        } else {
            self.state.lock().unwrap().read_error = None;
        }
    }

    /// One poll tick. Dispatches every due entry for `now`'s minute, in
    /// file order, one at a time.
    pub async fn tick(&self, now: NaiveDateTime) {
        self.reload_if_changed();

        let fired_at = fired_minute(&now);
        let due: Vec<ScheduleEntry> = {
            let state = self.state.lock().unwrap();
            state
                .entries
                .iter()
                .filter(|e| effective_enabled(&state, e))
                .filter(|e| e.cron.matches(&now))
                .cloned()
                .collect()
        };

        for entry in due {
            let execution_id = match self.history.record_start(&entry.id, &fired_at) {
                Ok(StartGuard::Started(id)) => id,
                // Fired earlier this minute (previous tick or a manual run).
                Ok(StartGuard::AlreadyFired) => continue,
                Err(e) => {
                    tracing::error!("🛑 History store unavailable, aborting tick: {e}");
                    return;
                }
            };
            self.fire(&entry, execution_id).await;
        }
    }

    /// Dispatch one entry and record the outcome.
    async fn fire(&self, entry: &ScheduleEntry, execution_id: i64) -> Outcome {
        tracing::info!(
            "🔔 Entry {} due: {} {}",
            entry.id,
            entry.action.kind(),
            entry.action.target()
        );
        let outcome = self.dispatcher.dispatch(entry).await;
        match &outcome {
            Outcome::Success => {
                if let Err(e) = self.history.record_end(execution_id, ExecStatus::Success, None) {
                    tracing::error!("🛑 Failed to record outcome: {e}");
                }
                self.bus
                    .emit("schedule.fired", &entry.id, entry.action.kind(), "success");
            }
            Outcome::Failure(reason) => {
                if let Err(e) =
                    self.history
                        .record_end(execution_id, ExecStatus::Failure, Some(reason))
                {
                    tracing::error!("🛑 Failed to record outcome: {e}");
                }
                let event =
                    self.bus
                        .emit("schedule.failed", &entry.id, entry.action.kind(), "failure");
                if entry.critical {
                    tracing::error!("🚨 Critical entry {} failed: {reason}", entry.id);
                    if let Some(url) = &self.alert_webhook {
                        events::send_alert_webhook(url, &event, reason).await;
                    }
                } else {
                    tracing::warn!("⚠️ Entry {} failed: {reason}", entry.id);
                }
            }
        }
        outcome
    }

    /// Fire an entry immediately, through the same dedup/record path as
    /// the poll loop. Disabled entries can be run this way; removed or
    /// unknown ids cannot.
    pub async fn run_now(&self, entry_id: &str) -> Result<Outcome> {
        self.run_now_at(entry_id, Local::now().naive_local()).await
    }

    async fn run_now_at(&self, entry_id: &str, now: NaiveDateTime) -> Result<Outcome> {
        let entry = {
            let state = self.state.lock().unwrap();
            state
                .entries
                .iter()
                .find(|e| e.id == entry_id && !state.removed.contains(&e.id))
                .cloned()
        }
        .ok_or_else(|| DeskclawError::Schedule(format!("unknown entry '{entry_id}'")))?;

        let fired_at = fired_minute(&now);
        let execution_id = match self
            .history
            .record_start(&entry.id, &fired_at)
            .map_err(DeskclawError::History)?
        {
            StartGuard::Started(id) => id,
            StartGuard::AlreadyFired => {
                return Ok(Outcome::failure("already fired this minute"));
            }
        };
        Ok(self.fire(&entry, execution_id).await)
    }

    /// Run the polling loop until shutdown. Tick N+1 never starts before
    /// tick N's dispatches have resolved.
    pub async fn run(&self) {
        let poll = Duration::from_secs(self.poll_secs.max(MIN_POLL_SECS));
        tracing::info!("⏰ Scheduler loop started (poll every {}s)", poll.as_secs());

        let mut interval = tokio::time::interval(poll);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.stop.notified() => {
                    tracing::info!("⏹️ Scheduler loop stopped");
                    return;
                }
            }
            self.tick(Local::now().naive_local()).await;
        }
    }

    /// Request a clean stop; observed at the loop's sleep point.
    pub fn shutdown(&self) {
        self.stop.notify_one();
    }

    // ─── Control surface (gateway/CLI) ──────────────────────

    /// Entries with their effective enabled state (file flag + override).
    /// Removed entries are hidden.
    pub fn entries(&self) -> Vec<(ScheduleEntry, bool)> {
        let state = self.state.lock().unwrap();
        state
            .entries
            .iter()
            .filter(|e| !state.removed.contains(&e.id))
            .map(|e| (e.clone(), effective_enabled(&state, e)))
            .collect()
    }

    /// Parse issues from the last load.
    pub fn issues(&self) -> Vec<ParseIssue> {
        self.state.lock().unwrap().issues.clone()
    }

    /// Last schedule re-read failure, if the current set is stale.
    pub fn read_error(&self) -> Option<String> {
        self.state.lock().unwrap().read_error.clone()
    }

    /// Enable or disable an entry without editing the file. Takes effect
    /// on the next tick. Returns false for unknown ids.
    pub fn set_enabled(&self, entry_id: &str, enabled: bool) -> bool {
        let mut state = self.state.lock().unwrap();
        let known = state
            .entries
            .iter()
            .any(|e| e.id == entry_id && !state.removed.contains(&e.id));
        if known {
            state.overrides.insert(entry_id.to_string(), enabled);
        }
        known
    }

    /// Hide an entry until the schedule file changes. Returns false for
    /// unknown ids.
    pub fn remove(&self, entry_id: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        let known = state.entries.iter().any(|e| e.id == entry_id);
        if known {
            state.removed.insert(entry_id.to_string());
            state.overrides.remove(entry_id);
        }
        known
    }

    pub fn history(&self) -> Arc<HistoryStore> {
        self.history.clone()
    }

    pub fn events(&self) -> EventBus {
        self.bus.clone()
    }
}

fn effective_enabled(state: &ScheduleState, entry: &ScheduleEntry) -> bool {
    if state.removed.contains(&entry.id) {
        return false;
    }
    *state.overrides.get(&entry.id).unwrap_or(&entry.enabled)
}

/// Dedup key for one matched minute: local wall clock, seconds dropped.
fn fired_minute(now: &NaiveDateTime) -> String {
    now.format("%Y-%m-%dT%H:%M").to_string()
}

fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::SpawnPolicy;
    use crate::registry::JobRegistry;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use deskclaw_core::error::Result as CoreResult;
    use deskclaw_session::{SessionBridge, SpawnedSession};
    use std::collections::HashSet as SessionSet;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct MockBridge {
        sessions: Mutex<SessionSet<String>>,
    }

    #[async_trait]
    impl SessionBridge for MockBridge {
        fn session_name(&self, role: &str) -> String {
            format!("desk-{role}")
        }

        async fn exists(&self, target: &str) -> CoreResult<bool> {
            Ok(self.sessions.lock().unwrap().contains(target))
        }

        async fn send(&self, _target: &str, _text: &str, _tag: &str) -> CoreResult<()> {
            Ok(())
        }

        async fn spawn(&self, name: &str, _role: &str, _payload: &str) -> CoreResult<SpawnedSession> {
            self.sessions.lock().unwrap().insert(name.to_string());
            Ok(SpawnedSession {
                session_id: name.to_string(),
            })
        }
    }

    struct Rig {
        scheduler: Scheduler,
        schedule_path: PathBuf,
        dir: PathBuf,
    }

    impl Drop for Rig {
        fn drop(&mut self) {
            std::fs::remove_dir_all(&self.dir).ok();
        }
    }

    fn rig(name: &str, schedule: &str, jobs: JobRegistry) -> Rig {
        let dir = std::env::temp_dir().join(format!("deskclaw-engine-{name}"));
        std::fs::remove_dir_all(&dir).ok();
        std::fs::create_dir_all(&dir).unwrap();
        let schedule_path = dir.join("schedule.md");
        std::fs::write(&schedule_path, schedule).unwrap();

        let history = Arc::new(HistoryStore::open(&dir.join("history.db")).unwrap());
        let dispatcher = Dispatcher::new(
            Arc::new(MockBridge::default()),
            Arc::new(jobs),
            SpawnPolicy::Single,
            Duration::from_secs(5),
        );
        let config = SchedulerConfig {
            schedule_path: schedule_path.to_string_lossy().into_owned(),
            ..SchedulerConfig::default()
        };
        let scheduler = Scheduler::new(&config, history, dispatcher, EventBus::new(8), None);
        scheduler.load().unwrap();
        Rig {
            scheduler,
            schedule_path,
            dir,
        }
    }

    fn counting_jobs(name: &str) -> (JobRegistry, Arc<AtomicUsize>) {
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = counter.clone();
        let mut jobs = JobRegistry::new();
        jobs.register_fn(name, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (jobs, counter)
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 6, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[tokio::test]
    async fn test_exec_fires_once_per_matched_minute() {
        let (jobs, counter) = counting_jobs("memory-consolidation");
        let r = rig("once", "0 6 * * * exec memory-consolidation\n", jobs);

        // Two polls inside the same matched minute — one firing.
        r.scheduler.tick(at(6, 0, 10)).await;
        r.scheduler.tick(at(6, 0, 59)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // Next minute does not match the expression at all.
        r.scheduler.tick(at(6, 1, 10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        assert_eq!(r.scheduler.history().recent(10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_wildcard_fires_once_per_minute_under_fast_polling() {
        let (jobs, counter) = counting_jobs("probe");
        let r = rig("fastpoll", "* * * * * exec probe\n", jobs);

        // 20s polling: three ticks in one minute, still one firing.
        for s in [0, 20, 40] {
            r.scheduler.tick(at(10, 0, s)).await;
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        r.scheduler.tick(at(10, 1, 0)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_inject_target_records_failure() {
        let r = rig(
            "notarget",
            "*/15 * * * * inject chief \"check status\"\n",
            JobRegistry::new(),
        );
        let mut rx = r.scheduler.events().subscribe();

        r.scheduler.tick(at(9, 15, 0)).await;

        let recent = r.scheduler.history().recent(10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].status, ExecStatus::Failure);
        assert_eq!(recent[0].error.as_deref(), Some("target not found"));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, "schedule.failed");
        assert_eq!(event.action_kind, "inject");
    }

    #[tokio::test]
    async fn test_disable_and_enable_via_handle() {
        let (jobs, counter) = counting_jobs("probe");
        let r = rig("toggle", "* * * * * exec probe\n", jobs);
        let id = r.scheduler.entries()[0].0.id.clone();

        assert!(r.scheduler.set_enabled(&id, false));
        r.scheduler.tick(at(11, 0, 0)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        assert!(r.scheduler.set_enabled(&id, true));
        r.scheduler.tick(at(11, 1, 0)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        assert!(!r.scheduler.set_enabled("bogus", true));
    }

    #[tokio::test]
    async fn test_run_now_and_tick_share_the_dedup_guard() {
        let (jobs, counter) = counting_jobs("probe");
        let r = rig("runnow", "0 6 * * * exec probe\n", jobs);
        let id = r.scheduler.entries()[0].0.id.clone();

        let outcome = r.scheduler.run_now_at(&id, at(6, 0, 5)).await.unwrap();
        assert!(outcome.is_success());

        // The poll tick for the same minute loses the race.
        r.scheduler.tick(at(6, 0, 30)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(r.scheduler.history().recent(10).unwrap().len(), 1);

        // So does a second manual trigger.
        let again = r.scheduler.run_now_at(&id, at(6, 0, 45)).await.unwrap();
        assert_eq!(again, Outcome::failure("already fired this minute"));

        let missing = r.scheduler.run_now_at("bogus", at(6, 0, 50)).await;
        assert!(missing.is_err());
    }

    #[tokio::test]
    async fn test_reload_picks_up_file_changes() {
        let (jobs, counter) = counting_jobs("late-arrival");
        let r = rig("reload", "0 6 * * * exec noop\n", jobs);

        std::fs::write(&r.schedule_path, "30 6 * * * exec late-arrival\n").unwrap();
        r.scheduler.tick(at(6, 30, 0)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(r.scheduler.entries().len(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_file_keeps_stale_entries() {
        let (jobs, counter) = counting_jobs("probe");
        let r = rig("stale", "* * * * * exec probe\n", jobs);

        std::fs::remove_file(&r.schedule_path).unwrap();
        r.scheduler.tick(at(12, 0, 0)).await;

        // Stale but valid: the entry still fired, and the failure is visible.
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(r.scheduler.read_error().is_some());
    }

    #[tokio::test]
    async fn test_removed_entry_stops_firing() {
        let (jobs, counter) = counting_jobs("probe");
        let r = rig("remove", "* * * * * exec probe\n", jobs);
        let id = r.scheduler.entries()[0].0.id.clone();

        assert!(r.scheduler.remove(&id));
        r.scheduler.tick(at(13, 0, 0)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(r.scheduler.entries().is_empty());
        assert!(!r.scheduler.remove("bogus"));
    }

    #[tokio::test]
    async fn test_dispatch_order_follows_file_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut jobs = JobRegistry::new();
        for name in ["first", "second", "third"] {
            let seen = order.clone();
            jobs.register_fn(name, move |_| {
                seen.lock().unwrap().push(name.to_string());
                Ok(())
            });
        }
        let r = rig(
            "order",
            "* * * * * exec first\n* * * * * exec second\n* * * * * exec third\n",
            jobs,
        );

        r.scheduler.tick(at(14, 0, 0)).await;
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_one_failing_entry_does_not_stop_the_tick() {
        let (jobs, counter) = counting_jobs("survivor");
        let r = rig(
            "contained",
            "* * * * * inject ghost hello\n* * * * * exec survivor\n",
            jobs,
        );

        r.scheduler.tick(at(15, 0, 0)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let recent = r.scheduler.history().recent(10).unwrap();
        assert_eq!(recent.len(), 2);
    }

    #[tokio::test]
    async fn test_disabled_in_file_is_parsed_but_never_dispatched() {
        let (jobs, counter) = counting_jobs("probe");
        let r = rig("offline", "off * * * * * exec probe\n", jobs);

        let entries = r.scheduler.entries();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].1);

        r.scheduler.tick(at(16, 0, 0)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_load_refuses_missing_file() {
        let dir = std::env::temp_dir().join("deskclaw-engine-missing");
        std::fs::remove_dir_all(&dir).ok();
        std::fs::create_dir_all(&dir).unwrap();
        let history = Arc::new(HistoryStore::open(&dir.join("history.db")).unwrap());
        let dispatcher = Dispatcher::new(
            Arc::new(MockBridge::default()),
            Arc::new(JobRegistry::new()),
            SpawnPolicy::Single,
            Duration::from_secs(5),
        );
        let config = SchedulerConfig {
            schedule_path: dir.join("nope.md").to_string_lossy().into_owned(),
            ..SchedulerConfig::default()
        };
        let scheduler = Scheduler::new(&config, history, dispatcher, EventBus::new(8), None);
        assert!(scheduler.load().is_err());
        std::fs::remove_dir_all(&dir).ok();
    }
}
