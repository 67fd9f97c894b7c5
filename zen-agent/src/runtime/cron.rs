//! Five-field cron matching (minute hour day month weekday), UTC.

use chrono::{DateTime, Datelike, Timelike, Utc};

/// Check one cron field against a value. Supports `*`, `*/n`, lists, and
/// ranges.
fn field_matches(field: &str, value: u32) -> bool {
    if field == "*" {
        return true;
    }
    if let Some(step) = field.strip_prefix("*/")
        && let Ok(n) = step.parse::<u32>()
    {
        return n > 0 && value % n == 0;
    }
    for part in field.split(',') {
        if let Some((start, end)) = part.split_once('-') {
            if let (Ok(start), Ok(end)) = (start.parse::<u32>(), end.parse::<u32>())
                && value >= start
                && value <= end
            {
                return true;
            }
        } else if part.parse::<u32>() == Ok(value) {
            return true;
        }
    }
    false
}

/// Whether a UTC instant matches a 5-field cron expression.
///
/// A malformed expression (wrong field count) never matches.
#[must_use]
pub fn matches(cron: &str, at: &DateTime<Utc>) -> bool {
    let fields: Vec<&str> = cron.split_whitespace().collect();
    if fields.len() != 5 {
        return false;
    }
    field_matches(fields[0], at.minute())
        && field_matches(fields[1], at.hour())
        && field_matches(fields[2], at.day())
        && field_matches(fields[3], at.month())
        && field_matches(fields[4], at.weekday().num_days_from_sunday())
}

/// The minute key used to fire a cron at most once per matching minute.
#[must_use]
pub fn minute_key(at: &DateTime<Utc>) -> i64 {
    at.timestamp() / 60
}
