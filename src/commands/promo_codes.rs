use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::{Connection, TransactionBehavior};
use std::collections::BTreeSet;

use crate::auth;
use crate::commands::orders::{categories_of, resolve_lines, resolve_restaurant, subtotal_of};
use crate::db;
use crate::error::{AppError, AppResult, FieldErrors};
use crate::models::{
    round_money, DiscountSummary, DiscountType, PromoCode, PromoValidation, SavePromoCode,
    ValidatePromoCode,
};
use crate::promo::{self, normalize_code, PROMO_COLUMNS};
use crate::validation::{optional_text, required_choice};
use crate::AppState;

const MAX_CODE_LENGTH: usize = 50;

/// Accepts `YYYY-MM-DD HH:MM:SS`, the `T`-separated form, or a bare date.
/// A bare date means the start of the day for `valid_from` and the last
/// second of the day for `valid_until`.
fn parse_bound(value: &str, end_of_day: bool) -> Option<NaiveDateTime> {
    let value = value.trim();
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed);
        }
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()?;
    let time = if end_of_day {
        NaiveTime::from_hms_opt(23, 59, 59)?
    } else {
        NaiveTime::MIN
    };
    Some(date.and_time(time))
}

/// A promo code that passed validation, ready to be written.
struct PromoDraft {
    code: String,
    discount_type: DiscountType,
    discount_value: f64,
    minimum_order_amount: f64,
    maximum_discount_amount: Option<f64>,
    total_usage_limit: Option<i64>,
    usage_limit_per_customer: Option<i64>,
    valid_from: NaiveDateTime,
    valid_until: NaiveDateTime,
    is_active: bool,
    applicable_categories: BTreeSet<i64>,
}

fn code_taken(conn: &Connection, code: &str, except_id: Option<i64>) -> AppResult<bool> {
    let taken = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM promo_codes WHERE code = ?1 AND (?2 IS NULL OR id != ?2))",
        rusqlite::params![code, except_id],
        |row| row.get(0),
    )?;
    Ok(taken)
}

fn category_belongs_to(conn: &Connection, category_id: i64, restaurant_id: i64) -> AppResult<bool> {
    let belongs = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM categories WHERE id = ?1 AND restaurant_id = ?2)",
        [category_id, restaurant_id],
        |row| row.get(0),
    )?;
    Ok(belongs)
}

/// Validates `input` layered over `existing` (absent fields keep the stored
/// value on update).
fn validate_draft(
    conn: &Connection,
    restaurant_id: i64,
    input: &SavePromoCode,
    existing: Option<&PromoCode>,
) -> AppResult<PromoDraft> {
    let mut errors = FieldErrors::new();

    let code = match optional_text(input.code.as_deref()) {
        Some(code) => {
            let code = normalize_code(&code);
            if code.chars().count() > MAX_CODE_LENGTH {
                errors.add("code", "The code may not be greater than 50 characters.");
                None
            } else if !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
                errors.add("code", "The code may only contain letters, numbers, dashes and underscores.");
                None
            } else if code_taken(conn, &code, existing.map(|p| p.id))? {
                errors.add("code", "The code has already been taken.");
                None
            } else {
                Some(code)
            }
        }
        None => match existing {
            Some(promo) if input.code.is_none() => Some(promo.code.clone()),
            _ => {
                errors.add("code", "The code field is required.");
                None
            }
        },
    };

    let discount_type = match (input.discount_type.as_deref(), existing) {
        (None, Some(promo)) => Some(promo.discount_type),
        (raw, _) => required_choice::<DiscountType>(&mut errors, "discount_type", "discount type", raw),
    };

    let discount_value = match input.discount_value.or(existing.map(|p| p.discount_value)) {
        None => {
            errors.add("discount_value", "The discount value field is required.");
            None
        }
        Some(value) if value <= 0.0 => {
            errors.add("discount_value", "The discount value must be greater than 0.");
            None
        }
        Some(value) if discount_type == Some(DiscountType::Percentage) && value > 100.0 => {
            errors.add(
                "discount_value",
                "The discount value may not be greater than 100 for percentage codes.",
            );
            None
        }
        Some(value) => Some(value),
    };

    let minimum_order_amount = input
        .minimum_order_amount
        .or(existing.map(|p| p.minimum_order_amount))
        .unwrap_or(0.0);
    if minimum_order_amount < 0.0 {
        errors.add("minimum_order_amount", "The minimum order amount must be at least 0.");
    }

    let maximum_discount_amount = input
        .maximum_discount_amount
        .or(existing.and_then(|p| p.maximum_discount_amount));
    if maximum_discount_amount.is_some_and(|cap| cap < 0.0) {
        errors.add("maximum_discount_amount", "The maximum discount amount must be at least 0.");
    }

    let total_usage_limit = input
        .total_usage_limit
        .or(existing.and_then(|p| p.total_usage_limit));
    if total_usage_limit.is_some_and(|limit| limit < 1) {
        errors.add("total_usage_limit", "The total usage limit must be at least 1.");
    }

    let usage_limit_per_customer = input
        .usage_limit_per_customer
        .or(existing.and_then(|p| p.usage_limit_per_customer));
    if usage_limit_per_customer.is_some_and(|limit| limit < 1) {
        errors.add("usage_limit_per_customer", "The usage limit per customer must be at least 1.");
    }

    let mut bound = |field: &str, label: &str, raw: Option<&str>, stored: Option<NaiveDateTime>, end_of_day: bool| {
        match (optional_text(raw), stored) {
            (Some(text), _) => {
                let parsed = parse_bound(&text, end_of_day);
                if parsed.is_none() {
                    errors.add(field, format!("The {} is not a valid date.", label));
                }
                parsed
            }
            (None, Some(stored)) if raw.is_none() => Some(stored),
            _ => {
                errors.add(field, format!("The {} field is required.", label));
                None
            }
        }
    };
    let valid_from = bound(
        "valid_from",
        "valid from",
        input.valid_from.as_deref(),
        existing.map(|p| p.valid_from),
        false,
    );
    let valid_until = bound(
        "valid_until",
        "valid until",
        input.valid_until.as_deref(),
        existing.map(|p| p.valid_until),
        true,
    );
    if let (Some(from), Some(until)) = (valid_from, valid_until) {
        if until < from {
            errors.add(
                "valid_until",
                "The valid until must be a date after or equal to valid from.",
            );
        }
    }

    let applicable_categories: BTreeSet<i64> = match &input.applicable_categories {
        Some(categories) => {
            for (index, category_id) in categories.iter().enumerate() {
                if !category_belongs_to(conn, *category_id, restaurant_id)? {
                    errors.add(
                        format!("applicable_categories.{}", index),
                        "The selected category is invalid.",
                    );
                }
            }
            categories.iter().copied().collect()
        }
        None => existing
            .map(|p| p.applicable_categories.iter().copied().collect())
            .unwrap_or_default(),
    };

    errors.into_result()?;

    match (code, discount_type, discount_value, valid_from, valid_until) {
        (Some(code), Some(discount_type), Some(discount_value), Some(valid_from), Some(valid_until)) => {
            Ok(PromoDraft {
                code,
                discount_type,
                discount_value,
                minimum_order_amount,
                maximum_discount_amount,
                total_usage_limit,
                usage_limit_per_customer,
                valid_from,
                valid_until,
                is_active: input.is_active.or(existing.map(|p| p.is_active)).unwrap_or(true),
                applicable_categories,
            })
        }
        _ => Err(AppError::Internal("promo code passed validation without values".to_string())),
    }
}

fn write_categories(conn: &Connection, promo_id: i64, categories: &BTreeSet<i64>) -> AppResult<()> {
    conn.execute(
        "DELETE FROM promo_code_categories WHERE promo_code_id = ?1",
        [promo_id],
    )?;
    for category_id in categories {
        conn.execute(
            "INSERT INTO promo_code_categories (promo_code_id, category_id) VALUES (?1, ?2)",
            [promo_id, *category_id],
        )?;
    }
    Ok(())
}

pub fn list_promo_codes(state: &AppState, user_id: i64, restaurant_id: i64) -> AppResult<Vec<PromoCode>> {
    let conn = state.db.lock()?;
    auth::ensure_owner(&conn, restaurant_id, user_id)?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM promo_codes WHERE restaurant_id = ?1 ORDER BY valid_from DESC, id DESC",
        PROMO_COLUMNS
    ))?;

    let mut codes = stmt
        .query_map([restaurant_id], promo::map_promo)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    for code in &mut codes {
        code.applicable_categories = promo::load_categories(&conn, code.id)?;
    }

    Ok(codes)
}

pub fn create_promo_code(
    state: &AppState,
    user_id: i64,
    restaurant_id: i64,
    input: SavePromoCode,
) -> AppResult<PromoCode> {
    let mut conn = state.db.lock()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    auth::ensure_owner(&tx, restaurant_id, user_id)?;

    let draft = validate_draft(&tx, restaurant_id, &input, None)?;

    tx.execute(
        "INSERT INTO promo_codes (
            restaurant_id, code, discount_type, discount_value, minimum_order_amount,
            maximum_discount_amount, total_usage_limit, usage_limit_per_customer,
            used_count, valid_from, valid_until, is_active
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?10, ?11)",
        rusqlite::params![
            restaurant_id,
            draft.code,
            draft.discount_type,
            draft.discount_value,
            draft.minimum_order_amount,
            draft.maximum_discount_amount,
            draft.total_usage_limit,
            draft.usage_limit_per_customer,
            draft.valid_from,
            draft.valid_until,
            draft.is_active,
        ],
    )?;

    let promo_id = tx.last_insert_rowid();
    write_categories(&tx, promo_id, &draft.applicable_categories)?;
    tx.commit()?;

    tracing::info!(promo_code_id = promo_id, restaurant_id, code = %draft.code, "promo code created");

    promo::find_by_id(&conn, promo_id)?.ok_or(AppError::NotFound("Promo code"))
}

/// Partial update. `used_count` is never touched here.
pub fn update_promo_code(
    state: &AppState,
    user_id: i64,
    promo_id: i64,
    input: SavePromoCode,
) -> AppResult<PromoCode> {
    let mut conn = state.db.lock()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let existing = promo::find_by_id(&tx, promo_id)?.ok_or(AppError::NotFound("Promo code"))?;
    auth::ensure_owner(&tx, existing.restaurant_id, user_id)?;

    let draft = validate_draft(&tx, existing.restaurant_id, &input, Some(&existing))?;

    tx.execute(
        "UPDATE promo_codes SET
            code = ?1, discount_type = ?2, discount_value = ?3, minimum_order_amount = ?4,
            maximum_discount_amount = ?5, total_usage_limit = ?6, usage_limit_per_customer = ?7,
            valid_from = ?8, valid_until = ?9, is_active = ?10
         WHERE id = ?11",
        rusqlite::params![
            draft.code,
            draft.discount_type,
            draft.discount_value,
            draft.minimum_order_amount,
            draft.maximum_discount_amount,
            draft.total_usage_limit,
            draft.usage_limit_per_customer,
            draft.valid_from,
            draft.valid_until,
            draft.is_active,
            promo_id,
        ],
    )?;

    write_categories(&tx, promo_id, &draft.applicable_categories)?;
    tx.commit()?;

    tracing::info!(promo_code_id = promo_id, code = %draft.code, "promo code updated");

    promo::find_by_id(&conn, promo_id)?.ok_or(AppError::NotFound("Promo code"))
}

/// Previews a code against a basket without redeeming it. When `items` are
/// given the subtotal and categories come from the current menu, otherwise
/// the supplied `subtotal` is used and category restrictions see an empty
/// basket.
pub fn validate_promo_code(
    state: &AppState,
    customer_id: i64,
    input: ValidatePromoCode,
) -> AppResult<PromoValidation> {
    let conn = state.db.lock()?;
    let mut errors = FieldErrors::new();

    let code = optional_text(input.code.as_deref());
    if code.is_none() {
        errors.add("code", "The code field is required.");
    }
    let restaurant_id = resolve_restaurant(&conn, input.restaurant_id, &mut errors)?;

    let basket = match (&input.items, input.subtotal) {
        (Some(items), _) => {
            let lines = resolve_lines(&conn, restaurant_id, items, &mut errors)?;
            Some((subtotal_of(&lines), categories_of(&lines)))
        }
        (None, Some(subtotal)) if subtotal < 0.0 => {
            errors.add("subtotal", "The subtotal must be at least 0.");
            None
        }
        (None, Some(subtotal)) => Some((round_money(subtotal), BTreeSet::new())),
        (None, None) => {
            errors.add("subtotal", "The subtotal field is required when items is not present.");
            None
        }
    };

    errors.into_result()?;
    let (Some(code), Some(restaurant_id), Some((subtotal, categories))) = (code, restaurant_id, basket) else {
        return Err(AppError::Internal("promo check passed validation without values".to_string()));
    };

    let validation = match promo::check(
        &conn,
        restaurant_id,
        &code,
        subtotal,
        &categories,
        Some(customer_id),
        db::now(),
    )? {
        Ok(redemption) => PromoValidation {
            valid: true,
            discount: Some(DiscountSummary {
                amount: redemption.discount,
            }),
            promo_code: Some(redemption.promo),
            message: None,
        },
        Err(rejection) => {
            tracing::debug!(restaurant_id, code = %code, reason = %rejection, "promo code rejected");
            PromoValidation {
                valid: false,
                discount: None,
                promo_code: None,
                message: Some(rejection.to_string()),
            }
        }
    };

    Ok(validation)
}
