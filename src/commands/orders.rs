use chrono::NaiveDateTime;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior};
use std::collections::BTreeSet;

use crate::auth;
use crate::db;
use crate::error::{AppError, AppResult, FieldErrors};
use crate::models::{
    round_money, CreateOrder, CreateOrderItem, DeliveryType, MenuItem, Order, OrderFilter,
    OrderItem, OrderStatus, OrderWithItems, PaymentMethod, UpdateOrderStatus,
};
use crate::promo;
use crate::status;
use crate::validation::{is_email, optional_text, required_choice, required_text};
use crate::AppState;

pub const UNAVAILABLE_MESSAGE: &str = "One or more menu items are unavailable.";

const ORDER_COLUMNS: &str = "id, order_number, customer_id, restaurant_id, status, subtotal,
     discount_amount, total_amount, customer_name, customer_email, customer_phone,
     delivery_type, delivery_address, payment_method, promo_code_id, notes, created_at, updated_at";

fn map_order(row: &Row<'_>) -> rusqlite::Result<Order> {
    Ok(Order {
        id: row.get(0)?,
        order_number: row.get(1)?,
        customer_id: row.get(2)?,
        restaurant_id: row.get(3)?,
        status: row.get(4)?,
        subtotal: row.get(5)?,
        discount_amount: row.get(6)?,
        total_amount: row.get(7)?,
        customer_name: row.get(8)?,
        customer_email: row.get(9)?,
        customer_phone: row.get(10)?,
        delivery_type: row.get(11)?,
        delivery_address: row.get(12)?,
        payment_method: row.get(13)?,
        promo_code_id: row.get(14)?,
        notes: row.get(15)?,
        created_at: row.get(16)?,
        updated_at: row.get(17)?,
    })
}

fn load_items(conn: &Connection, order_id: i64) -> rusqlite::Result<Vec<OrderItem>> {
    let mut item_stmt = conn.prepare(
        "SELECT id, order_id, menu_item_id, name, quantity, price, notes
         FROM order_items
         WHERE order_id = ?1
         ORDER BY id",
    )?;

    let items = item_stmt
        .query_map([order_id], |row| {
            Ok(OrderItem {
                id: row.get(0)?,
                order_id: row.get(1)?,
                menu_item_id: row.get(2)?,
                name: row.get(3)?,
                quantity: row.get(4)?,
                price: row.get(5)?,
                notes: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(items)
}

pub fn load_order(conn: &Connection, id: i64) -> AppResult<Option<OrderWithItems>> {
    let order = conn
        .query_row(
            &format!("SELECT {} FROM orders WHERE id = ?1", ORDER_COLUMNS),
            [id],
            map_order,
        )
        .optional()?;

    match order {
        Some(order) => {
            let items = load_items(conn, order.id)?;
            Ok(Some(OrderWithItems { order, items }))
        }
        None => Ok(None),
    }
}

/// A requested line resolved against the current menu.
#[derive(Debug, Clone)]
pub(crate) struct PricedLine {
    pub menu_item: MenuItem,
    pub quantity: i64,
    pub notes: Option<String>,
}

fn find_menu_item(conn: &Connection, id: i64) -> AppResult<Option<MenuItem>> {
    let item = conn
        .query_row(
            "SELECT id, restaurant_id, category_id, name, price, is_available
             FROM menu_items WHERE id = ?1",
            [id],
            |row| {
                Ok(MenuItem {
                    id: row.get(0)?,
                    restaurant_id: row.get(1)?,
                    category_id: row.get(2)?,
                    name: row.get(3)?,
                    price: row.get(4)?,
                    is_available: row.get(5)?,
                })
            },
        )
        .optional()?;
    Ok(item)
}

pub(crate) fn restaurant_exists(conn: &Connection, restaurant_id: i64) -> AppResult<bool> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM restaurants WHERE id = ?1)",
        [restaurant_id],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// Validated restaurant id, or a field error on `restaurant_id`.
pub(crate) fn resolve_restaurant(
    conn: &Connection,
    restaurant_id: Option<i64>,
    errors: &mut FieldErrors,
) -> AppResult<Option<i64>> {
    match restaurant_id {
        None => {
            errors.add("restaurant_id", "The restaurant id field is required.");
            Ok(None)
        }
        Some(id) if restaurant_exists(conn, id)? => Ok(Some(id)),
        Some(_) => {
            errors.add("restaurant_id", "The selected restaurant is invalid.");
            Ok(None)
        }
    }
}

/// Checks each requested line's shape and looks the menu item up. Errors are
/// keyed `items.{index}.{field}`. Menu ownership is only checked when the
/// restaurant itself is valid.
pub(crate) fn resolve_lines(
    conn: &Connection,
    restaurant_id: Option<i64>,
    items: &[CreateOrderItem],
    errors: &mut FieldErrors,
) -> AppResult<Vec<PricedLine>> {
    if items.is_empty() {
        errors.add("items", "The order must contain at least one item.");
        return Ok(Vec::new());
    }

    let mut lines = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let quantity = match item.quantity {
            None => {
                errors.add(format!("items.{}.quantity", index), "The quantity field is required.");
                None
            }
            Some(quantity) if quantity < 1 => {
                errors.add(format!("items.{}.quantity", index), "The quantity must be at least 1.");
                None
            }
            Some(quantity) => Some(quantity),
        };

        let menu_item = match item.menu_item_id {
            None => {
                errors.add(
                    format!("items.{}.menu_item_id", index),
                    "The menu item id field is required.",
                );
                None
            }
            Some(menu_item_id) => match (restaurant_id, find_menu_item(conn, menu_item_id)?) {
                (Some(restaurant_id), Some(menu_item)) if menu_item.restaurant_id == restaurant_id => {
                    Some(menu_item)
                }
                (None, _) => None,
                _ => {
                    errors.add(
                        format!("items.{}.menu_item_id", index),
                        "The selected menu item is invalid.",
                    );
                    None
                }
            },
        };

        if let (Some(menu_item), Some(quantity)) = (menu_item, quantity) {
            lines.push(PricedLine {
                menu_item,
                quantity,
                notes: optional_text(item.notes.as_deref()),
            });
        }
    }

    Ok(lines)
}

pub(crate) fn ensure_available(lines: &[PricedLine]) -> AppResult<()> {
    if let Some(line) = lines.iter().find(|line| !line.menu_item.is_available) {
        tracing::info!(menu_item_id = line.menu_item.id, "order rejected: menu item unavailable");
        return Err(AppError::business(UNAVAILABLE_MESSAGE));
    }
    Ok(())
}

pub(crate) fn subtotal_of(lines: &[PricedLine]) -> f64 {
    round_money(
        lines
            .iter()
            .map(|line| line.menu_item.price * line.quantity as f64)
            .sum(),
    )
}

pub(crate) fn categories_of(lines: &[PricedLine]) -> BTreeSet<i64> {
    lines
        .iter()
        .filter_map(|line| line.menu_item.category_id)
        .collect()
}

/// Checkout fields after validation.
struct Checkout {
    restaurant_id: i64,
    customer_name: String,
    customer_email: String,
    customer_phone: String,
    delivery_type: DeliveryType,
    delivery_address: Option<String>,
    payment_method: PaymentMethod,
    promo_code: Option<String>,
    notes: Option<String>,
}

fn validate_checkout(
    conn: &Connection,
    input: &CreateOrder,
    errors: &mut FieldErrors,
) -> AppResult<Option<Checkout>> {
    let restaurant_id = resolve_restaurant(conn, input.restaurant_id, errors)?;
    let customer_name = required_text(
        errors,
        "customer_name",
        "customer name",
        input.customer_name.as_deref(),
    );
    let customer_email = required_text(
        errors,
        "customer_email",
        "customer email",
        input.customer_email.as_deref(),
    )
    .filter(|email| {
        let valid = is_email(email);
        if !valid {
            errors.add("customer_email", "The customer email must be a valid email address.");
        }
        valid
    });
    let customer_phone = required_text(
        errors,
        "customer_phone",
        "customer phone",
        input.customer_phone.as_deref(),
    );
    let delivery_type: Option<DeliveryType> = required_choice(
        errors,
        "delivery_type",
        "delivery type",
        input.delivery_type.as_deref(),
    );
    let delivery_address = optional_text(input.delivery_address.as_deref());
    if delivery_type == Some(DeliveryType::Delivery) && delivery_address.is_none() {
        errors.add(
            "delivery_address",
            "The delivery address field is required when delivery type is delivery.",
        );
    }
    let payment_method: Option<PaymentMethod> = required_choice(
        errors,
        "payment_method",
        "payment method",
        input.payment_method.as_deref(),
    );

    let checkout = match (
        restaurant_id,
        customer_name,
        customer_email,
        customer_phone,
        delivery_type,
        payment_method,
    ) {
        (
            Some(restaurant_id),
            Some(customer_name),
            Some(customer_email),
            Some(customer_phone),
            Some(delivery_type),
            Some(payment_method),
        ) => Some(Checkout {
            restaurant_id,
            customer_name,
            customer_email,
            customer_phone,
            delivery_type,
            delivery_address,
            payment_method,
            promo_code: optional_text(input.promo_code.as_deref()),
            notes: optional_text(input.notes.as_deref()),
        }),
        _ => None,
    };

    Ok(checkout)
}

/// `ORD-{utc timestamp}-{restaurant}-{sequence}`; the sequence is the
/// restaurant's order count plus one, read inside the write transaction.
fn order_number(now: NaiveDateTime, restaurant_id: i64, sequence: i64) -> String {
    format!(
        "ORD-{}-{}-{:04}",
        now.format("%Y%m%d%H%M%S"),
        restaurant_id,
        sequence
    )
}

fn next_sequence(conn: &Connection, restaurant_id: i64) -> AppResult<i64> {
    let sequence = conn.query_row(
        "SELECT COUNT(*) + 1 FROM orders WHERE restaurant_id = ?1",
        [restaurant_id],
        |row| row.get(0),
    )?;
    Ok(sequence)
}

fn user_exists(conn: &Connection, user_id: i64) -> AppResult<bool> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
        [user_id],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// Places an order for `customer_id`. Validation, pricing, promo redemption
/// and every insert share one immediate transaction: either the order and
/// all its items exist with the usage counter bumped, or nothing was written.
pub fn place_order(
    state: &AppState,
    customer_id: i64,
    input: CreateOrder,
) -> AppResult<OrderWithItems> {
    let mut conn = state.db.lock()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if !user_exists(&tx, customer_id)? {
        return Err(AppError::Unauthenticated);
    }

    let mut errors = FieldErrors::new();
    let checkout = validate_checkout(&tx, &input, &mut errors)?;
    let restaurant_id = checkout.as_ref().map(|c| c.restaurant_id);
    let lines = resolve_lines(&tx, restaurant_id, &input.items, &mut errors)?;
    errors.into_result()?;
    let Some(checkout) = checkout else {
        return Err(AppError::Internal("checkout passed validation without values".to_string()));
    };

    ensure_available(&lines)?;

    let subtotal = subtotal_of(&lines);
    let now = db::now();

    let redemption = match checkout.promo_code.as_deref() {
        Some(code) => {
            let categories = categories_of(&lines);
            match promo::check(
                &tx,
                checkout.restaurant_id,
                code,
                subtotal,
                &categories,
                Some(customer_id),
                now,
            )? {
                Ok(redemption) => Some(redemption),
                Err(rejection) => {
                    tracing::info!(
                        restaurant_id = checkout.restaurant_id,
                        code,
                        reason = %rejection,
                        "order rejected: promo code"
                    );
                    return Err(rejection.into());
                }
            }
        }
        None => None,
    };

    let discount_amount = redemption.as_ref().map_or(0.0, |r| r.discount);
    let total_amount = round_money(subtotal - discount_amount).max(0.0);
    let sequence = next_sequence(&tx, checkout.restaurant_id)?;
    let order_number = order_number(now, checkout.restaurant_id, sequence);

    tx.execute(
        "INSERT INTO orders (
            order_number, customer_id, restaurant_id, status, subtotal, discount_amount,
            total_amount, customer_name, customer_email, customer_phone, delivery_type,
            delivery_address, payment_method, promo_code_id, notes, created_at, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?16)",
        rusqlite::params![
            order_number,
            customer_id,
            checkout.restaurant_id,
            OrderStatus::Pending,
            subtotal,
            discount_amount,
            total_amount,
            checkout.customer_name,
            checkout.customer_email,
            checkout.customer_phone,
            checkout.delivery_type,
            checkout.delivery_address,
            checkout.payment_method,
            redemption.as_ref().map(|r| r.promo.id),
            checkout.notes,
            now,
        ],
    )?;

    let order_id = tx.last_insert_rowid();

    for line in &lines {
        tx.execute(
            "INSERT INTO order_items (order_id, menu_item_id, name, quantity, price, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                order_id,
                line.menu_item.id,
                line.menu_item.name,
                line.quantity,
                line.menu_item.price,
                line.notes,
            ],
        )?;
    }

    if let Some(redemption) = &redemption {
        if let Err(rejection) = promo::redeem(&tx, redemption.promo.id)? {
            return Err(rejection.into());
        }
    }

    tx.commit()?;

    let placed = load_order(&conn, order_id)?.ok_or(AppError::NotFound("Order"))?;
    drop(conn);

    tracing::info!(
        order_id,
        order_number = %placed.order.order_number,
        subtotal,
        discount_amount,
        total_amount,
        "order placed"
    );
    state.notifier.order_placed(&placed);

    Ok(placed)
}

/// Visible to the customer who placed it and to the restaurant's staff.
pub fn get_order(state: &AppState, user_id: i64, id: i64) -> AppResult<OrderWithItems> {
    let conn = state.db.lock()?;
    let order = load_order(&conn, id)?.ok_or(AppError::NotFound("Order"))?;

    if order.order.customer_id != user_id {
        auth::ensure_staff(&conn, order.order.restaurant_id, user_id)?;
    }

    Ok(order)
}

pub fn list_restaurant_orders(
    state: &AppState,
    user_id: i64,
    restaurant_id: i64,
    filter: OrderFilter,
) -> AppResult<Vec<OrderWithItems>> {
    let conn = state.db.lock()?;
    auth::ensure_staff(&conn, restaurant_id, user_id)?;

    let status = match optional_text(filter.status.as_deref()) {
        Some(raw) => Some(
            raw.parse::<OrderStatus>()
                .map_err(|_| AppError::field("status", "The selected status is invalid."))?,
        ),
        None => None,
    };

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM orders
         WHERE restaurant_id = ?1 AND (?2 IS NULL OR status = ?2)
         ORDER BY created_at DESC, id DESC",
        ORDER_COLUMNS
    ))?;

    let orders: Vec<Order> = stmt
        .query_map(rusqlite::params![restaurant_id, status], map_order)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut result = Vec::with_capacity(orders.len());
    for order in orders {
        let items = load_items(&conn, order.id)?;
        result.push(OrderWithItems { order, items });
    }

    Ok(result)
}

/// Moves an order to a new status. Only the restaurant's staff may do this,
/// and terminal orders are locked.
pub fn update_order_status(
    state: &AppState,
    user_id: i64,
    order_id: i64,
    input: UpdateOrderStatus,
) -> AppResult<OrderWithItems> {
    let mut conn = state.db.lock()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let current = load_order(&tx, order_id)?.ok_or(AppError::NotFound("Order"))?;
    auth::ensure_staff(&tx, current.order.restaurant_id, user_id)?;

    let mut errors = FieldErrors::new();
    let target: Option<OrderStatus> =
        required_choice(&mut errors, "status", "status", input.status.as_deref());
    errors.into_result()?;
    let Some(target) = target else {
        return Err(AppError::field("status", "The status field is required."));
    };

    let from = current.order.status;
    status::check_transition(state.status_policy, from, target).map_err(|rejection| {
        tracing::info!(order_id, %from, to = %target, reason = %rejection, "status change rejected");
        AppError::business(rejection.to_string())
    })?;

    let changed = tx.execute(
        "UPDATE orders SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
        rusqlite::params![target, db::now(), order_id, from],
    )?;
    if changed == 0 {
        return Err(AppError::business(
            "The order was changed by someone else. Please reload and try again.",
        ));
    }

    tx.commit()?;

    let updated = load_order(&conn, order_id)?.ok_or(AppError::NotFound("Order"))?;
    drop(conn);

    tracing::info!(order_id, %from, to = %target, user_id, "order status changed");
    state.notifier.order_updated(&updated);

    Ok(updated)
}
