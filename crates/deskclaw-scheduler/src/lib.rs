//! # deskclaw-scheduler
//!
//! The unified schedule loop for deskclaw: a human-edited schedule file
//! drives injections into live assistant sessions, spawns of new sessions,
//! and registered in-process jobs.
//!
//! ## Design principles
//! - The schedule file is the source of truth — entries are derived, never
//!   owned; each parse pass replaces the in-memory set.
//! - SQLite execution history is the dedup guard — one row per
//!   (entry, matched minute), enforced by the store, not by the loop.
//! - One bad entry never takes down a tick, and one bad tick never takes
//!   down the loop.
//!
//! ## Architecture
//! ```text
//! schedule.md ──parse──▶ ScheduleEntry set
//!                              │
//! Scheduler (tokio interval) ──┤ every poll tick
//!   ├── CronExpr::matches(now) filters due entries
//!   ├── HistoryStore.record_start — conditional insert, dedups the minute
//!   ├── Dispatcher
//!   │     ├── inject → SessionBridge.send (tagged "[schedule] …")
//!   │     ├── spawn  → SessionBridge.spawn (conflict policy applies)
//!   │     └── exec   → JobRegistry lookup, bounded blocking call
//!   ├── HistoryStore.record_end
//!   └── EventBus: schedule.fired / schedule.failed (+ critical alerts)
//! ```

pub mod cron;
pub mod dispatch;
pub mod engine;
pub mod events;
pub mod history;
pub mod registry;
pub mod schedule;

pub use cron::CronExpr;
pub use dispatch::{Dispatcher, Outcome, SpawnPolicy};
pub use engine::Scheduler;
pub use events::{EventBus, SchedulerEvent};
pub use history::{ExecStatus, ExecutionRecord, HistoryStore, StartGuard};
pub use registry::{Job, JobRegistry};
pub use schedule::{ParseIssue, ScheduleAction, ScheduleEntry, ScheduleFile};
