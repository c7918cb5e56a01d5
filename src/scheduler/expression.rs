use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;

use super::error::ScheduleError;

const WEEKDAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Parse a cron expression.
///
/// Five-field expressions (`min hour dom month dow`) follow the classic crontab
/// layout: they get a leading seconds field of `0`, and numeric weekdays
/// (`0`-`6`, with `7` also meaning Sunday) are rewritten as day names, since
/// the underlying parser counts Sunday as `1`. Six and seven field expressions
/// are used as is.
pub fn parse_schedule(expression: &str) -> Result<Schedule, ScheduleError> {
    let trimmed = expression.trim();
    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    let normalized = if fields.len() == 5 {
        format!(
            "0 {} {} {} {} {}",
            fields[0],
            fields[1],
            fields[2],
            fields[3],
            weekday_field(fields[4])
        )
    } else {
        trimmed.to_string()
    };

    Schedule::from_str(&normalized).map_err(|e| ScheduleError::InvalidExpression {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

fn weekday_field(field: &str) -> String {
    field.split(',').map(weekday_item).collect::<Vec<_>>().join(",")
}

/// Expand one list item (`3`, `1-5`, `*/2`, `1-7/3`) into day names.
/// Anything else, including names, is passed through for the parser to judge.
fn weekday_item(item: &str) -> String {
    let (base, step) = match item.split_once('/') {
        Some((base, step)) => (base, Some(step)),
        None => (item, None),
    };
    let step = match step.map(str::parse::<usize>) {
        None => 1,
        Some(Ok(n)) if n > 0 => n,
        Some(_) => return item.to_string(),
    };

    let bounds: Option<(usize, usize)> = match base {
        "*" | "?" if step == 1 => return item.to_string(),
        "*" | "?" => Some((0, 6)),
        _ => match base.split_once('-') {
            Some((start, end)) => start.parse().ok().zip(end.parse().ok()),
            // `n/step` runs from n to the end of the week
            None if item.contains('/') => base.parse().ok().map(|start| (start, 6)),
            None => base.parse().ok().map(|day| (day, day)),
        },
    };
    let (start, end) = match bounds {
        Some((start, end)) if start <= end && end <= 7 => (start, end),
        _ => return item.to_string(),
    };

    let mut names: Vec<&str> = Vec::new();
    for day in (start..=end).step_by(step) {
        let name = WEEKDAYS[day % 7];
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names.join(",")
}

/// Next fire time strictly after `after`
pub fn next_after(schedule: &Schedule, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(after).next()
}
