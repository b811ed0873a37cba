use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior};

use crate::auth;
use crate::error::{AppError, AppResult, FieldErrors};
use crate::models::{SaveShift, Shift, WeekQuery, WeeklyHours};
use crate::shifts::{self, find_conflict, parse_shift_window, OVERLAP_MESSAGE};
use crate::validation::optional_text;
use crate::AppState;

const SHIFT_COLUMNS: &str =
    "s.id, s.restaurant_id, s.user_id, u.name, s.starts_at, s.ends_at, s.note";

fn map_shift(row: &Row<'_>) -> rusqlite::Result<Shift> {
    Ok(Shift {
        id: row.get(0)?,
        restaurant_id: row.get(1)?,
        user_id: row.get(2)?,
        user_name: row.get(3)?,
        starts_at: row.get(4)?,
        ends_at: row.get(5)?,
        note: row.get(6)?,
    })
}

fn find_shift(conn: &Connection, id: i64) -> AppResult<Option<Shift>> {
    let shift = conn
        .query_row(
            &format!(
                "SELECT {} FROM shifts s LEFT JOIN users u ON u.id = s.user_id WHERE s.id = ?1",
                SHIFT_COLUMNS
            ),
            [id],
            map_shift,
        )
        .optional()?;
    Ok(shift)
}

/// The employee's shifts in the restaurant that could touch `[starts_at, ends_at)`.
fn employee_shifts_near(
    conn: &Connection,
    restaurant_id: i64,
    user_id: i64,
    starts_at: NaiveDateTime,
    ends_at: NaiveDateTime,
) -> AppResult<Vec<Shift>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM shifts s LEFT JOIN users u ON u.id = s.user_id
         WHERE s.restaurant_id = ?1 AND s.user_id = ?2 AND s.starts_at < ?3 AND s.ends_at > ?4
         ORDER BY s.starts_at",
        SHIFT_COLUMNS
    ))?;

    let shifts = stmt
        .query_map(
            rusqlite::params![restaurant_id, user_id, ends_at, starts_at],
            map_shift,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(shifts)
}

fn shifts_between(
    conn: &Connection,
    restaurant_id: i64,
    from: NaiveDateTime,
    until: NaiveDateTime,
) -> AppResult<Vec<Shift>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM shifts s LEFT JOIN users u ON u.id = s.user_id
         WHERE s.restaurant_id = ?1 AND s.starts_at < ?2 AND s.ends_at > ?3
         ORDER BY s.starts_at, s.user_id",
        SHIFT_COLUMNS
    ))?;

    let shifts = stmt
        .query_map(rusqlite::params![restaurant_id, until, from], map_shift)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(shifts)
}

/// Rejects the window when it collides with another shift of the same
/// employee. Reported against `start_time`.
fn ensure_no_overlap(
    conn: &Connection,
    restaurant_id: i64,
    user_id: i64,
    starts_at: NaiveDateTime,
    ends_at: NaiveDateTime,
    exclude_id: Option<i64>,
) -> AppResult<()> {
    let existing = employee_shifts_near(conn, restaurant_id, user_id, starts_at, ends_at)?;
    if let Some(conflict) = find_conflict(starts_at, ends_at, &existing, exclude_id) {
        tracing::info!(
            restaurant_id,
            user_id,
            conflicting_shift_id = conflict.id,
            %starts_at,
            %ends_at,
            "shift rejected: overlap"
        );
        return Err(AppError::field("start_time", OVERLAP_MESSAGE));
    }
    Ok(())
}

fn parse_week_start(query: &WeekQuery) -> AppResult<NaiveDate> {
    match optional_text(query.week_start.as_deref()) {
        Some(raw) => NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
            .map_err(|_| AppError::field("week_start", "The week start is not a valid date.")),
        None => Ok(shifts::week_containing(crate::db::now().date())),
    }
}

pub fn create_shift(
    state: &AppState,
    owner_id: i64,
    restaurant_id: i64,
    input: SaveShift,
) -> AppResult<Shift> {
    let mut conn = state.db.lock()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    auth::ensure_owner(&tx, restaurant_id, owner_id)?;

    let mut errors = FieldErrors::new();
    let employee = match input.user_id {
        None => {
            errors.add("user_id", "The user id field is required.");
            None
        }
        Some(user_id) if auth::is_staff(&tx, restaurant_id, user_id)? => Some(user_id),
        Some(_) => {
            errors.add("user_id", "The selected employee is invalid.");
            None
        }
    };
    let window = match parse_shift_window(
        input.date.as_deref(),
        input.start_time.as_deref(),
        input.end_time.as_deref(),
    ) {
        Ok(window) => Some(window),
        Err(window_errors) => {
            errors.merge(window_errors);
            None
        }
    };
    errors.into_result()?;
    let (Some(user_id), Some((starts_at, ends_at))) = (employee, window) else {
        return Err(AppError::Internal("shift passed validation without values".to_string()));
    };

    ensure_no_overlap(&tx, restaurant_id, user_id, starts_at, ends_at, None)?;

    tx.execute(
        "INSERT INTO shifts (restaurant_id, user_id, starts_at, ends_at, note)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            restaurant_id,
            user_id,
            starts_at,
            ends_at,
            optional_text(input.note.as_deref()),
        ],
    )?;
    let shift_id = tx.last_insert_rowid();
    tx.commit()?;

    tracing::info!(shift_id, restaurant_id, user_id, %starts_at, %ends_at, "shift created");

    find_shift(&conn, shift_id)?.ok_or(AppError::NotFound("Shift"))
}

/// Reschedules a shift. The employee cannot be changed; `user_id` is ignored.
pub fn update_shift(
    state: &AppState,
    owner_id: i64,
    shift_id: i64,
    input: SaveShift,
) -> AppResult<Shift> {
    let mut conn = state.db.lock()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let current = find_shift(&tx, shift_id)?.ok_or(AppError::NotFound("Shift"))?;
    auth::ensure_owner(&tx, current.restaurant_id, owner_id)?;

    let (starts_at, ends_at) = parse_shift_window(
        input.date.as_deref(),
        input.start_time.as_deref(),
        input.end_time.as_deref(),
    )?;

    ensure_no_overlap(
        &tx,
        current.restaurant_id,
        current.user_id,
        starts_at,
        ends_at,
        Some(shift_id),
    )?;

    let note = match input.note.as_deref() {
        Some(note) => optional_text(Some(note)),
        None => current.note.clone(),
    };

    tx.execute(
        "UPDATE shifts SET starts_at = ?1, ends_at = ?2, note = ?3 WHERE id = ?4",
        rusqlite::params![starts_at, ends_at, note, shift_id],
    )?;
    tx.commit()?;

    tracing::info!(shift_id, %starts_at, %ends_at, "shift updated");

    find_shift(&conn, shift_id)?.ok_or(AppError::NotFound("Shift"))
}

pub fn delete_shift(state: &AppState, owner_id: i64, shift_id: i64) -> AppResult<()> {
    let conn = state.db.lock()?;
    let shift = find_shift(&conn, shift_id)?.ok_or(AppError::NotFound("Shift"))?;
    auth::ensure_owner(&conn, shift.restaurant_id, owner_id)?;

    conn.execute("DELETE FROM shifts WHERE id = ?1", [shift_id])?;
    tracing::info!(shift_id, restaurant_id = shift.restaurant_id, "shift deleted");
    Ok(())
}

/// Shifts overlapping the week that starts on `week_start` (default: this
/// week's Monday).
pub fn list_week_shifts(
    state: &AppState,
    user_id: i64,
    restaurant_id: i64,
    query: WeekQuery,
) -> AppResult<Vec<Shift>> {
    let conn = state.db.lock()?;
    auth::ensure_staff(&conn, restaurant_id, user_id)?;

    let (from, until) = shifts::week_window(parse_week_start(&query)?);
    shifts_between(&conn, restaurant_id, from, until)
}

pub fn weekly_hours(
    state: &AppState,
    user_id: i64,
    restaurant_id: i64,
    query: WeekQuery,
) -> AppResult<Vec<WeeklyHours>> {
    let conn = state.db.lock()?;
    auth::ensure_staff(&conn, restaurant_id, user_id)?;

    let week_start = parse_week_start(&query)?;
    let (from, until) = shifts::week_window(week_start);
    let week = shifts_between(&conn, restaurant_id, from, until)?;
    Ok(shifts::weekly_hours(&week, week_start))
}
