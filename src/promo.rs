//! Promo code evaluation and redemption.
//!
//! Evaluation is a short-circuit sequence of checks; the first failing check
//! decides the rejection. Redemption bumps `used_count` with a conditional
//! update so concurrent checkouts can never push it past the limit.

use chrono::NaiveDateTime;
use rusqlite::{Connection, OptionalExtension, Row};
use std::collections::BTreeSet;

use crate::error::AppResult;
use crate::models::{round_money, DiscountType, PromoCode};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PromoError {
    #[error("Invalid promo code.")]
    NotFound,

    #[error("This promo code is no longer active.")]
    Inactive,

    #[error("This promo code is not valid at this time.")]
    OutOfWindow,

    #[error("This promo code has reached its usage limit.")]
    LimitReached,

    #[error("You have already used this promo code the maximum number of times.")]
    CustomerLimitReached,

    #[error("A minimum order amount of {0:.2} is required to use this promo code.")]
    BelowMinimum(f64),

    #[error("This promo code does not apply to the items in your order.")]
    CategoryMismatch,
}

/// What the evaluator needs to know about the order being priced.
#[derive(Debug, Clone)]
pub struct PromoContext<'a> {
    pub subtotal: f64,
    pub categories: &'a BTreeSet<i64>,
    /// Orders the customer already placed with this code, when the customer
    /// is known.
    pub customer_redemptions: Option<i64>,
    pub now: NaiveDateTime,
}

/// A code that passed every check, with the discount it grants.
#[derive(Debug, Clone)]
pub struct Redemption {
    pub promo: PromoCode,
    pub discount: f64,
}

/// Runs checks 2 onwards against an already loaded code.
pub fn evaluate(promo: &PromoCode, ctx: &PromoContext<'_>) -> Result<f64, PromoError> {
    if !promo.is_active {
        return Err(PromoError::Inactive);
    }

    if ctx.now < promo.valid_from || ctx.now > promo.valid_until {
        return Err(PromoError::OutOfWindow);
    }

    if let Some(limit) = promo.total_usage_limit {
        if promo.used_count >= limit {
            return Err(PromoError::LimitReached);
        }
    }

    if let (Some(limit), Some(used)) = (promo.usage_limit_per_customer, ctx.customer_redemptions) {
        if used >= limit {
            return Err(PromoError::CustomerLimitReached);
        }
    }

    if ctx.subtotal < promo.minimum_order_amount {
        return Err(PromoError::BelowMinimum(promo.minimum_order_amount));
    }

    // Any overlap between the order's categories and the code's categories
    // is enough.
    if !promo.applicable_categories.is_empty()
        && !promo
            .applicable_categories
            .iter()
            .any(|category| ctx.categories.contains(category))
    {
        return Err(PromoError::CategoryMismatch);
    }

    Ok(discount_for(promo, ctx.subtotal))
}

/// Discount granted on `subtotal`; never more than the subtotal.
pub fn discount_for(promo: &PromoCode, subtotal: f64) -> f64 {
    let raw = match promo.discount_type {
        DiscountType::Percentage => {
            let discount = subtotal * (promo.discount_value / 100.0);
            match promo.maximum_discount_amount {
                Some(cap) => discount.min(cap),
                None => discount,
            }
        }
        DiscountType::FixedAmount => promo.discount_value.min(subtotal),
    };
    round_money(raw.max(0.0)).min(subtotal)
}

pub(crate) const PROMO_COLUMNS: &str = "id, restaurant_id, code, discount_type, discount_value,
     minimum_order_amount, maximum_discount_amount, total_usage_limit,
     usage_limit_per_customer, used_count, valid_from, valid_until, is_active";

/// Maps a row selected with `PROMO_COLUMNS`. Categories are loaded separately.
pub(crate) fn map_promo(row: &Row<'_>) -> rusqlite::Result<PromoCode> {
    Ok(PromoCode {
        id: row.get(0)?,
        restaurant_id: row.get(1)?,
        code: row.get(2)?,
        discount_type: row.get(3)?,
        discount_value: row.get(4)?,
        minimum_order_amount: row.get(5)?,
        maximum_discount_amount: row.get(6)?,
        total_usage_limit: row.get(7)?,
        usage_limit_per_customer: row.get(8)?,
        used_count: row.get(9)?,
        valid_from: row.get(10)?,
        valid_until: row.get(11)?,
        is_active: row.get(12)?,
        applicable_categories: Vec::new(),
    })
}

pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

pub(crate) fn load_categories(conn: &Connection, promo_id: i64) -> rusqlite::Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT category_id FROM promo_code_categories WHERE promo_code_id = ?1 ORDER BY category_id",
    )?;
    let categories = stmt
        .query_map([promo_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()?;
    Ok(categories)
}

pub fn find_by_id(conn: &Connection, id: i64) -> AppResult<Option<PromoCode>> {
    let promo = conn
        .query_row(
            &format!("SELECT {} FROM promo_codes WHERE id = ?1", PROMO_COLUMNS),
            [id],
            map_promo,
        )
        .optional()?;

    match promo {
        Some(mut promo) => {
            promo.applicable_categories = load_categories(conn, promo.id)?;
            Ok(Some(promo))
        }
        None => Ok(None),
    }
}

/// Looks a code up within one restaurant; codes match case-insensitively.
pub fn find_for_restaurant(
    conn: &Connection,
    restaurant_id: i64,
    code: &str,
) -> AppResult<Option<PromoCode>> {
    let promo = conn
        .query_row(
            &format!(
                "SELECT {} FROM promo_codes WHERE restaurant_id = ?1 AND code = ?2",
                PROMO_COLUMNS
            ),
            rusqlite::params![restaurant_id, normalize_code(code)],
            map_promo,
        )
        .optional()?;

    match promo {
        Some(mut promo) => {
            promo.applicable_categories = load_categories(conn, promo.id)?;
            Ok(Some(promo))
        }
        None => Ok(None),
    }
}

/// Orders this customer already placed with the code.
pub fn customer_redemptions(conn: &Connection, promo_id: i64, customer_id: i64) -> AppResult<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM orders WHERE promo_code_id = ?1 AND customer_id = ?2",
        [promo_id, customer_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Full evaluator: lookup followed by every check. The outer error is a
/// storage failure; the inner one is the rejection to show the customer.
pub fn check(
    conn: &Connection,
    restaurant_id: i64,
    code: &str,
    subtotal: f64,
    categories: &BTreeSet<i64>,
    customer_id: Option<i64>,
    now: NaiveDateTime,
) -> AppResult<Result<Redemption, PromoError>> {
    let Some(promo) = find_for_restaurant(conn, restaurant_id, code)? else {
        return Ok(Err(PromoError::NotFound));
    };

    let customer_redemptions = match (customer_id, promo.usage_limit_per_customer) {
        (Some(customer_id), Some(_)) => Some(customer_redemptions(conn, promo.id, customer_id)?),
        _ => None,
    };

    let ctx = PromoContext {
        subtotal,
        categories,
        customer_redemptions,
        now,
    };

    Ok(evaluate(&promo, &ctx).map(|discount| Redemption { promo, discount }))
}

/// Atomically bumps `used_count` unless the limit has been reached.
pub fn redeem(conn: &Connection, promo_id: i64) -> AppResult<Result<(), PromoError>> {
    let changed = conn.execute(
        "UPDATE promo_codes
         SET used_count = used_count + 1
         WHERE id = ?1 AND (total_usage_limit IS NULL OR used_count < total_usage_limit)",
        [promo_id],
    )?;

    if changed == 0 {
        tracing::warn!(promo_code_id = promo_id, "promo code limit reached during redemption");
        return Ok(Err(PromoError::LimitReached));
    }
    Ok(Ok(()))
}
