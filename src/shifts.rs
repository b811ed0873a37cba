//! Shift interval rules: overlap detection and weekly hour totals.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use std::collections::BTreeMap;

use crate::error::FieldErrors;
use crate::models::{Shift, WeeklyHours};

pub const OVERLAP_MESSAGE: &str = "This shift overlaps with an existing shift for this employee.";

/// Half-open intervals `[a_start, a_end)` and `[b_start, b_end)` overlap.
/// Back-to-back intervals do not.
pub fn overlaps(
    a_start: NaiveDateTime,
    a_end: NaiveDateTime,
    b_start: NaiveDateTime,
    b_end: NaiveDateTime,
) -> bool {
    a_start < b_end && a_end > b_start
}

/// First existing shift that collides with `[starts_at, ends_at)`, skipping
/// the shift being edited.
pub fn find_conflict<'a>(
    starts_at: NaiveDateTime,
    ends_at: NaiveDateTime,
    existing: &'a [Shift],
    exclude_id: Option<i64>,
) -> Option<&'a Shift> {
    existing
        .iter()
        .filter(|shift| Some(shift.id) != exclude_id)
        .find(|shift| overlaps(starts_at, ends_at, shift.starts_at, shift.ends_at))
}

fn parse_time(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .ok()
}

/// Builds `[starts_at, ends_at)` from a calendar date and two wall-clock
/// times. `ends_at` must be strictly after `starts_at`.
pub fn parse_shift_window(
    date: Option<&str>,
    start_time: Option<&str>,
    end_time: Option<&str>,
) -> Result<(NaiveDateTime, NaiveDateTime), FieldErrors> {
    let mut errors = FieldErrors::new();

    let date = match date.map(str::trim).filter(|d| !d.is_empty()) {
        None => {
            errors.add("date", "The date field is required.");
            None
        }
        Some(raw) => match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            Ok(date) => Some(date),
            Err(_) => {
                errors.add("date", "The date is not a valid date.");
                None
            }
        },
    };

    let mut time = |field: &str, label: &str, value: Option<&str>| match value
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        None => {
            errors.add(field, format!("The {} field is required.", label));
            None
        }
        Some(raw) => {
            let parsed = parse_time(raw);
            if parsed.is_none() {
                errors.add(field, format!("The {} must be a valid time (HH:MM).", label));
            }
            parsed
        }
    };

    let start = time("start_time", "start time", start_time);
    let end = time("end_time", "end time", end_time);

    if let (Some(date), Some(start), Some(end)) = (date, start, end) {
        let starts_at = date.and_time(start);
        let ends_at = date.and_time(end);
        if ends_at <= starts_at {
            errors.add("end_time", "The end time must be after the start time.");
        } else if errors.is_empty() {
            return Ok((starts_at, ends_at));
        }
    }

    Err(errors)
}

/// Hours to two decimal places.
fn round_hours(hours: f64) -> f64 {
    (hours * 100.0).round() / 100.0
}

/// Monday of the week containing `day`.
pub fn week_containing(day: NaiveDate) -> NaiveDate {
    day - Duration::days(day.weekday().num_days_from_monday() as i64)
}

/// `[week_start 00:00, week_start + 7 days 00:00)`.
pub fn week_window(week_start: NaiveDate) -> (NaiveDateTime, NaiveDateTime) {
    let start = week_start.and_time(NaiveTime::MIN);
    (start, start + Duration::days(7))
}

/// Hours worked per employee inside the week. Shifts straddling the window
/// edges only count the part inside it.
pub fn weekly_hours(shifts: &[Shift], week_start: NaiveDate) -> Vec<WeeklyHours> {
    let (window_start, window_end) = week_window(week_start);
    let mut seconds: BTreeMap<i64, (Option<String>, i64)> = BTreeMap::new();

    for shift in shifts {
        let start = shift.starts_at.max(window_start);
        let end = shift.ends_at.min(window_end);
        if end <= start {
            continue;
        }
        let entry = seconds
            .entry(shift.user_id)
            .or_insert_with(|| (shift.user_name.clone(), 0));
        entry.1 += (end - start).num_seconds();
    }

    seconds
        .into_iter()
        .map(|(user_id, (user_name, secs))| WeeklyHours {
            user_id,
            user_name,
            hours: round_hours(secs as f64 / 3600.0),
        })
        .collect()
}
