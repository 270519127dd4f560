//! SQLite-backed execution history.
//!
//! One row per (entry, matched minute). The UNIQUE key doubles as the
//! dedup guard: `record_start` is a conditional insert, so a slow poll
//! tick, a restart mid-minute, or a concurrent "run now" can never fire
//! the same entry twice for the same minute. Rows are append-only audit
//! data — `record_end` fills in the outcome, nothing deletes them except
//! the retention sweep.

use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{Connection, params};
use serde::Serialize;

/// Status of one execution. Rows start as `running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecStatus {
    Running,
    Success,
    Failure,
    Skipped,
}

impl ExecStatus {
    fn as_str(&self) -> &'static str {
        match self {
            ExecStatus::Running => "running",
            ExecStatus::Success => "success",
            ExecStatus::Failure => "failure",
            ExecStatus::Skipped => "skipped",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "success" => ExecStatus::Success,
            "failure" => ExecStatus::Failure,
            "skipped" => ExecStatus::Skipped,
            _ => ExecStatus::Running,
        }
    }
}

/// One recorded execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub id: i64,
    pub entry_id: String,
    /// The matched minute, local wall clock, `YYYY-MM-DDTHH:MM`.
    pub fired_at: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub status: ExecStatus,
    pub error: Option<String>,
}

/// Outcome of the conditional start insert.
#[derive(Debug, PartialEq, Eq)]
pub enum StartGuard {
    /// A fresh row was inserted; dispatch may proceed.
    Started(i64),
    /// This (entry, minute) already has a row — someone else got there.
    AlreadyFired,
}

/// Durable execution history store.
pub struct HistoryStore {
    conn: Mutex<Connection>,
}

impl HistoryStore {
    /// Open or create the history database.
    pub fn open(path: &Path) -> Result<Self, String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| format!("create dir: {e}"))?;
        }
        let conn = Connection::open(path).map_err(|e| format!("history open: {e}"))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS executions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entry_id TEXT NOT NULL,
                fired_at TEXT NOT NULL,
                started_at TEXT NOT NULL,
                ended_at TEXT,
                status TEXT NOT NULL DEFAULT 'running',
                error TEXT,
                UNIQUE (entry_id, fired_at)
            );
            CREATE INDEX IF NOT EXISTS idx_executions_started
                ON executions(started_at);",
        )
        .map_err(|e| format!("history migration: {e}"))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Conditionally record the start of a dispatch. The insert is the
    /// dedup check — there is no separate check-then-insert window.
    pub fn record_start(&self, entry_id: &str, fired_at: &str) -> Result<StartGuard, String> {
        let conn = self.conn.lock().unwrap();
        match conn.execute(
            "INSERT INTO executions (entry_id, fired_at, started_at, status)
             VALUES (?1, ?2, ?3, 'running')",
            params![entry_id, fired_at, Utc::now().to_rfc3339()],
        ) {
            Ok(_) => Ok(StartGuard::Started(conn.last_insert_rowid())),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Ok(StartGuard::AlreadyFired)
            }
            Err(e) => Err(format!("record start: {e}")),
        }
    }

    /// Move an execution to its terminal status.
    pub fn record_end(
        &self,
        execution_id: i64,
        status: ExecStatus,
        error: Option<&str>,
    ) -> Result<(), String> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE executions SET ended_at = ?1, status = ?2, error = ?3 WHERE id = ?4",
            params![
                Utc::now().to_rfc3339(),
                status.as_str(),
                error,
                execution_id
            ],
        )
        .map_err(|e| format!("record end: {e}"))?;
        Ok(())
    }

    /// Whether an entry already fired for the given minute.
    pub fn has_fired(&self, entry_id: &str, fired_at: &str) -> Result<bool, String> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM executions WHERE entry_id = ?1 AND fired_at = ?2",
                params![entry_id, fired_at],
                |row| row.get(0),
            )
            .map_err(|e| format!("has fired: {e}"))?;
        Ok(count > 0)
    }

    /// Most recent executions first.
    pub fn recent(&self, limit: usize) -> Result<Vec<ExecutionRecord>, String> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, entry_id, fired_at, started_at, ended_at, status, error
                 FROM executions ORDER BY id DESC LIMIT ?1",
            )
            .map_err(|e| format!("recent: {e}"))?;
        let rows = stmt
            .query_map([limit as i64], |row| {
                Ok(ExecutionRecord {
                    id: row.get(0)?,
                    entry_id: row.get(1)?,
                    fired_at: row.get(2)?,
                    started_at: row.get(3)?,
                    ended_at: row.get(4)?,
                    status: ExecStatus::from_str(&row.get::<_, String>(5)?),
                    error: row.get(6)?,
                })
            })
            .map_err(|e| format!("recent: {e}"))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("recent: {e}"))
    }

    /// Retention sweep — delete records older than `days`. Returns the
    /// number of rows removed.
    pub fn prune_older_than(&self, days: u32) -> Result<usize, String> {
        let cutoff = (Utc::now() - chrono::Duration::days(days as i64)).to_rfc3339();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM executions WHERE started_at < ?1",
            params![cutoff],
        )
        .map_err(|e| format!("prune: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp(name: &str) -> (HistoryStore, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("deskclaw-history-{name}"));
        std::fs::create_dir_all(&dir).ok();
        let path = dir.join("history.db");
        std::fs::remove_file(&path).ok();
        (HistoryStore::open(&path).unwrap(), dir)
    }

    #[test]
    fn test_start_end_roundtrip() {
        let (store, dir) = open_temp("roundtrip");

        let guard = store.record_start("abc123", "2026-06-01T06:00").unwrap();
        let StartGuard::Started(id) = guard else {
            panic!("expected fresh insert");
        };
        store
            .record_end(id, ExecStatus::Success, None)
            .unwrap();

        let recent = store.recent(10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].entry_id, "abc123");
        assert_eq!(recent[0].status, ExecStatus::Success);
        assert!(recent[0].ended_at.is_some());
        assert!(recent[0].error.is_none());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_dedup_guard_rejects_second_start() {
        let (store, dir) = open_temp("dedup");

        let first = store.record_start("abc123", "2026-06-01T06:00").unwrap();
        assert!(matches!(first, StartGuard::Started(_)));

        // A racing "run now" for the same minute must lose.
        let second = store.record_start("abc123", "2026-06-01T06:00").unwrap();
        assert_eq!(second, StartGuard::AlreadyFired);

        // A different minute is a fresh firing.
        let third = store.record_start("abc123", "2026-06-01T06:01").unwrap();
        assert!(matches!(third, StartGuard::Started(_)));

        assert_eq!(store.recent(10).unwrap().len(), 2);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_has_fired() {
        let (store, dir) = open_temp("hasfired");
        assert!(!store.has_fired("e1", "2026-06-01T06:00").unwrap());
        store.record_start("e1", "2026-06-01T06:00").unwrap();
        assert!(store.has_fired("e1", "2026-06-01T06:00").unwrap());
        assert!(!store.has_fired("e1", "2026-06-01T06:01").unwrap());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_recent_is_most_recent_first() {
        let (store, dir) = open_temp("recent");
        for minute in 0..5 {
            store
                .record_start("e1", &format!("2026-06-01T06:{minute:02}"))
                .unwrap();
        }
        let recent = store.recent(3).unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].fired_at, "2026-06-01T06:04");
        assert_eq!(recent[2].fired_at, "2026-06-01T06:02");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_failure_records_error() {
        let (store, dir) = open_temp("failure");
        let StartGuard::Started(id) =
            store.record_start("e1", "2026-06-01T06:00").unwrap()
        else {
            panic!("expected fresh insert");
        };
        store
            .record_end(id, ExecStatus::Failure, Some("target not found"))
            .unwrap();
        let recent = store.recent(1).unwrap();
        assert_eq!(recent[0].status, ExecStatus::Failure);
        assert_eq!(recent[0].error.as_deref(), Some("target not found"));
        std::fs::remove_dir_all(&dir).ok();
    }
}
