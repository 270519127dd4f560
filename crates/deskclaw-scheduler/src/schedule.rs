//! Schedule file parsing — the human-edited source of truth.
//!
//! One line per action:
//! ```text
//! # morning briefing into the chief session
//! 30 7 * * 1-5 inject chief "morning briefing please"
//! ! 0 6 * * * exec memory-consolidation
//! off 0 22 * * * spawn journal "wrap up the day"
//! ```
//! `!` marks an entry critical (dispatch failures are escalated), `off`
//! keeps it parsed but never dispatched. Comments, blank lines, and
//! markdown bullets are tolerated so the schedule can live inside a notes
//! file. Malformed lines are reported and skipped, never fatal.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::cron::CronExpr;

/// What a schedule entry does when it fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleAction {
    /// Send the payload into a live session's input.
    Inject { target: String },
    /// Launch a new assistant session for a role.
    Spawn { role: String },
    /// Run a registered in-process job — no session involved.
    Exec { job: String },
}

impl ScheduleAction {
    pub fn kind(&self) -> &'static str {
        match self {
            ScheduleAction::Inject { .. } => "inject",
            ScheduleAction::Spawn { .. } => "spawn",
            ScheduleAction::Exec { .. } => "exec",
        }
    }

    pub fn target(&self) -> &str {
        match self {
            ScheduleAction::Inject { target } => target,
            ScheduleAction::Spawn { role } => role,
            ScheduleAction::Exec { job } => job,
        }
    }
}

/// One line of the schedule file. Entries are derived, not owned — they
/// exist only as long as their line does.
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    /// Deterministic content hash of expression|action|target|payload, so
    /// re-parsing the same line yields the same id.
    pub id: String,
    /// The raw 5-field cron expression.
    pub expression: String,
    /// Parsed form of `expression`.
    pub cron: CronExpr,
    pub action: ScheduleAction,
    pub payload: String,
    /// Failures of critical entries are escalated, not just logged.
    pub critical: bool,
    /// Disabled entries are parsed but never dispatched.
    pub enabled: bool,
    /// Source line, for stable ordering and error reporting.
    pub line: usize,
}

/// A reported problem with one line — never fatal to the file.
#[derive(Debug, Clone, Serialize)]
pub struct ParseIssue {
    pub line: usize,
    pub message: String,
}

/// Result of one parse pass: the fresh entry set plus reported issues.
#[derive(Debug, Clone, Default)]
pub struct ScheduleFile {
    pub entries: Vec<ScheduleEntry>,
    pub issues: Vec<ParseIssue>,
}

/// Parse a schedule file. Duplicate ids (same expression, action, and
/// payload) collapse last-wins with a reported warning, which keeps the
/// file idempotently re-editable.
pub fn parse(content: &str) -> ScheduleFile {
    let mut entries: Vec<ScheduleEntry> = Vec::new();
    let mut issues = Vec::new();

    for (idx, raw) in content.lines().enumerate() {
        let lineno = idx + 1;
        let mut line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        line = line.strip_prefix("- ").unwrap_or(line);

        match parse_line(line, lineno) {
            Ok(entry) => {
                if let Some(pos) = entries.iter().position(|e| e.id == entry.id) {
                    issues.push(ParseIssue {
                        line: lineno,
                        message: format!(
                            "duplicate of line {}, keeping the later definition",
                            entries[pos].line
                        ),
                    });
                    entries.remove(pos);
                }
                entries.push(entry);
            }
            Err(message) => issues.push(ParseIssue {
                line: lineno,
                message,
            }),
        }
    }

    ScheduleFile { entries, issues }
}

/// Render entries back to schedule lines. Parsing the output reproduces
/// the same ids and fields.
pub fn serialize(entries: &[ScheduleEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        if entry.critical {
            out.push_str("! ");
        }
        if !entry.enabled {
            out.push_str("off ");
        }
        out.push_str(&entry.expression);
        out.push(' ');
        out.push_str(entry.action.kind());
        out.push(' ');
        out.push_str(entry.action.target());
        if !entry.payload.is_empty() {
            out.push_str(" \"");
            out.push_str(&entry.payload);
            out.push('"');
        }
        out.push('\n');
    }
    out
}

fn parse_line(line: &str, lineno: usize) -> Result<ScheduleEntry, String> {
    let mut critical = false;
    let mut enabled = true;
    let mut tokens: Vec<&str> = line.split_whitespace().collect();

    loop {
        match tokens.first() {
            Some(&"!") => {
                critical = true;
                tokens.remove(0);
            }
            Some(&"off") => {
                enabled = false;
                tokens.remove(0);
            }
            _ => break,
        }
    }

    if tokens.len() < 7 {
        return Err(
            "expected: MIN HOUR DOM MON DOW inject|spawn|exec TARGET [PAYLOAD]".into(),
        );
    }

    let expression = tokens[..5].join(" ");
    let cron = CronExpr::parse(&expression)
        .map_err(|e| format!("bad cron expression '{expression}': {e}"))?;

    let target = tokens[6].to_string();
    let action = match tokens[5] {
        "inject" => ScheduleAction::Inject { target },
        "spawn" => ScheduleAction::Spawn { role: target },
        "exec" => ScheduleAction::Exec { job: target },
        other => {
            return Err(format!(
                "unknown action '{other}' (expected inject, spawn, or exec)"
            ));
        }
    };

    let payload = unquote(&tokens[7..].join(" ")).to_string();

    Ok(ScheduleEntry {
        id: entry_id(&expression, &action, &payload),
        expression,
        cron,
        action,
        payload,
        critical,
        enabled,
        line: lineno,
    })
}

/// Strip one pair of surrounding double quotes, if present.
fn unquote(s: &str) -> &str {
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

/// 12-hex-char content hash — stable across parse passes.
fn entry_id(expression: &str, action: &ScheduleAction, payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(expression.as_bytes());
    hasher.update(b"|");
    hasher.update(action.kind().as_bytes());
    hasher.update(b"|");
    hasher.update(action.target().as_bytes());
    hasher.update(b"|");
    hasher.update(payload.as_bytes());
    hasher
        .finalize()
        .iter()
        .take(6)
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_lines() {
        let file = parse(
            "# comments are skipped\n\
             \n\
             30 7 * * 1-5 inject chief \"morning briefing\"\n\
             0 22 * * * spawn journal\n\
             0 6 * * * exec memory-consolidation\n",
        );
        assert!(file.issues.is_empty());
        assert_eq!(file.entries.len(), 3);

        let inject = &file.entries[0];
        assert_eq!(inject.action.kind(), "inject");
        assert_eq!(inject.action.target(), "chief");
        assert_eq!(inject.payload, "morning briefing");
        assert!(!inject.critical);
        assert!(inject.enabled);

        assert_eq!(file.entries[1].action.kind(), "spawn");
        assert_eq!(file.entries[2].action.target(), "memory-consolidation");
        assert!(file.entries[2].payload.is_empty());
    }

    #[test]
    fn test_flags_and_bullets() {
        let file = parse(
            "- ! 0 6 * * * exec consolidate\n\
             off */5 * * * * inject chief ping\n",
        );
        assert!(file.issues.is_empty());
        assert!(file.entries[0].critical);
        assert!(file.entries[0].enabled);
        assert!(!file.entries[1].critical);
        assert!(!file.entries[1].enabled);
    }

    #[test]
    fn test_malformed_line_is_isolated() {
        let file = parse(
            "0 6 * * * exec good-one\n\
             bad-expr exec foo\n\
             0 7 * * * exec other-one\n",
        );
        assert_eq!(file.entries.len(), 2);
        assert_eq!(file.issues.len(), 1);
        assert_eq!(file.issues[0].line, 2);
        assert_eq!(file.entries[0].action.target(), "good-one");
        assert_eq!(file.entries[1].action.target(), "other-one");
    }

    #[test]
    fn test_bad_cron_reported_not_fatal() {
        let file = parse("99 * * * * exec foo\n0 8 * * * exec bar\n");
        assert_eq!(file.entries.len(), 1);
        assert_eq!(file.issues.len(), 1);
        assert!(file.issues[0].message.contains("minute"));
    }

    #[test]
    fn test_unknown_action() {
        let file = parse("0 8 * * * poke chief hello\n");
        assert!(file.entries.is_empty());
        assert!(file.issues[0].message.contains("unknown action"));
    }

    #[test]
    fn test_stable_ids() {
        let a = parse("0 8 * * * inject chief hello\n");
        let b = parse("0 8 * * * inject chief hello\n");
        assert_eq!(a.entries[0].id, b.entries[0].id);

        let c = parse("0 8 * * * inject chief goodbye\n");
        assert_ne!(a.entries[0].id, c.entries[0].id);
    }

    #[test]
    fn test_duplicates_collapse_last_wins() {
        let file = parse(
            "0 8 * * * inject chief hello\n\
             ! 0 8 * * * inject chief hello\n",
        );
        assert_eq!(file.entries.len(), 1);
        assert_eq!(file.issues.len(), 1);
        // The later definition's flags win.
        assert!(file.entries[0].critical);
        assert!(file.issues[0].message.contains("duplicate"));
    }

    #[test]
    fn test_round_trip_is_id_stable() {
        let original = parse(
            "! 30 7 * * 1-5 inject chief \"morning briefing\"\n\
             off 0 22 * * * spawn journal \"wrap up\"\n\
             0 6 1 * 1 exec memory-consolidation\n",
        );
        assert!(original.issues.is_empty());

        let reparsed = parse(&serialize(&original.entries));
        assert!(reparsed.issues.is_empty());
        assert_eq!(original.entries.len(), reparsed.entries.len());
        for (a, b) in original.entries.iter().zip(reparsed.entries.iter()) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.expression, b.expression);
            assert_eq!(a.action, b.action);
            assert_eq!(a.payload, b.payload);
            assert_eq!(a.critical, b.critical);
            assert_eq!(a.enabled, b.enabled);
        }
    }
}
