//! 5-field cron expression matching.
//! Supports `*`, single values, ranges (`a-b`), comma lists, and steps
//! (`*/n`, `a-b/n`) per field: minute 0-59, hour 0-23, day-of-month 1-31,
//! month 1-12, day-of-week 0-6 with 0=Sunday (7 accepted as Sunday).
//!
//! Day-of-month and day-of-week combine the standard cron way: when both
//! are restricted the match is an OR of the two; when only one is
//! restricted, only that one applies.

use chrono::{Datelike, Timelike};

/// A parsed 5-field cron expression.
#[derive(Debug, Clone)]
pub struct CronExpr {
    minute: Field,
    hour: Field,
    dom: Field,
    month: Field,
    dow: Field,
}

/// One parsed field: the values it matches, plus whether the field was
/// written as a bare wildcard (needed for the dom/dow rule).
#[derive(Debug, Clone)]
struct Field {
    values: Vec<u32>,
    restricted: bool,
}

impl Field {
    fn contains(&self, value: u32) -> bool {
        self.values.contains(&value)
    }
}

impl CronExpr {
    /// Parse an expression. Errors name the offending field so schedule
    /// file issues read well.
    pub fn parse(expression: &str) -> Result<Self, String> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(format!(
                "need 5 fields (minute hour day-of-month month day-of-week), got {}",
                parts.len()
            ));
        }
        Ok(Self {
            minute: parse_field(parts[0], 0, 59).map_err(|e| format!("minute: {e}"))?,
            hour: parse_field(parts[1], 0, 23).map_err(|e| format!("hour: {e}"))?,
            dom: parse_field(parts[2], 1, 31).map_err(|e| format!("day-of-month: {e}"))?,
            month: parse_field(parts[3], 1, 12).map_err(|e| format!("month: {e}"))?,
            dow: parse_dow(parts[4]).map_err(|e| format!("day-of-week: {e}"))?,
        })
    }

    /// Whether the expression matches the given timestamp. Seconds are
    /// ignored — matching is minute-granular.
    pub fn matches<T: Datelike + Timelike>(&self, t: &T) -> bool {
        if !self.minute.contains(t.minute()) {
            return false;
        }
        if !self.hour.contains(t.hour()) {
            return false;
        }
        if !self.month.contains(t.month()) {
            return false;
        }
        let dom_ok = self.dom.contains(t.day());
        let dow_ok = self.dow.contains(t.weekday().num_days_from_sunday());
        match (self.dom.restricted, self.dow.restricted) {
            (true, true) => dom_ok || dow_ok,
            (true, false) => dom_ok,
            (false, true) => dow_ok,
            (false, false) => true,
        }
    }
}

/// Parse one field into the set of values it matches.
fn parse_field(field: &str, min: u32, max: u32) -> Result<Field, String> {
    if field == "*" {
        return Ok(Field {
            values: (min..=max).collect(),
            restricted: false,
        });
    }
    let mut values = Vec::new();
    for atom in field.split(',') {
        values.extend(parse_atom(atom.trim(), min, max)?);
    }
    values.sort_unstable();
    values.dedup();
    Ok(Field {
        values,
        restricted: true,
    })
}

/// One comma-list element: value, range, or either with a step.
fn parse_atom(atom: &str, min: u32, max: u32) -> Result<Vec<u32>, String> {
    let (range, step) = match atom.split_once('/') {
        Some((range, step)) => {
            let step: u32 = step
                .parse()
                .map_err(|_| format!("bad step '{step}'"))?;
            if step == 0 {
                return Err("step cannot be zero".into());
            }
            (range, step)
        }
        None => (atom, 1),
    };
    let (lo, hi) = if range == "*" {
        (min, max)
    } else if let Some((a, b)) = range.split_once('-') {
        (parse_value(a, min, max)?, parse_value(b, min, max)?)
    } else {
        let v = parse_value(range, min, max)?;
        // "5/15" runs from 5 to the field maximum, vixie-style.
        if step > 1 { (v, max) } else { (v, v) }
    };
    if lo > hi {
        return Err(format!("range {lo}-{hi} is inverted"));
    }
    Ok((lo..=hi).step_by(step as usize).collect())
}

fn parse_value(s: &str, min: u32, max: u32) -> Result<u32, String> {
    let v: u32 = s.parse().map_err(|_| format!("'{s}' is not a number"))?;
    if v < min || v > max {
        return Err(format!("{v} out of range {min}-{max}"));
    }
    Ok(v)
}

/// Day-of-week accepts 0-7 and folds 7 onto Sunday.
fn parse_dow(field: &str) -> Result<Field, String> {
    let mut parsed = parse_field(field, 0, 7)?;
    if parsed.restricted {
        for v in parsed.values.iter_mut() {
            if *v == 7 {
                *v = 0;
            }
        }
        parsed.values.sort_unstable();
        parsed.values.dedup();
    } else {
        parsed.values = (0..=6).collect();
    }
    Ok(parsed)
}
