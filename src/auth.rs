//! Caller identity and tenant access checks.
//!
//! Authentication happens upstream; the authenticated user id arrives in the
//! `X-User-Id` header.

use actix_web::{dev::Payload, FromRequest, HttpRequest};
use rusqlite::{Connection, OptionalExtension};
use std::future::{ready, Ready};

use crate::error::{AppError, AppResult};

pub const USER_HEADER: &str = "X-User-Id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser(pub i64);

impl FromRequest for CurrentUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let user = req
            .headers()
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<i64>().ok())
            .map(CurrentUser)
            .ok_or(AppError::Unauthenticated);
        ready(user)
    }
}

fn owner_of(conn: &Connection, restaurant_id: i64) -> AppResult<Option<i64>> {
    let owner = conn
        .query_row(
            "SELECT owner_id FROM restaurants WHERE id = ?1",
            [restaurant_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(owner)
}

/// Owner or employee of the restaurant.
pub fn is_staff(conn: &Connection, restaurant_id: i64, user_id: i64) -> AppResult<bool> {
    if owner_of(conn, restaurant_id)? == Some(user_id) {
        return Ok(true);
    }
    let employed: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM restaurant_staff WHERE restaurant_id = ?1 AND user_id = ?2)",
        [restaurant_id, user_id],
        |row| row.get(0),
    )?;
    Ok(employed)
}

/// Unknown restaurants are reported the same way as foreign ones.
pub fn ensure_staff(conn: &Connection, restaurant_id: i64, user_id: i64) -> AppResult<()> {
    if is_staff(conn, restaurant_id, user_id)? {
        Ok(())
    } else {
        tracing::debug!(restaurant_id, user_id, "staff access denied");
        Err(AppError::Forbidden)
    }
}

pub fn ensure_owner(conn: &Connection, restaurant_id: i64, user_id: i64) -> AppResult<()> {
    if owner_of(conn, restaurant_id)? == Some(user_id) {
        Ok(())
    } else {
        tracing::debug!(restaurant_id, user_id, "owner access denied");
        Err(AppError::Forbidden)
    }
}
