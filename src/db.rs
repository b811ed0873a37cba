use chrono::{NaiveDateTime, SubsecRound, Utc};
use rusqlite::{Connection, Result};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::{AppError, AppResult};

pub struct Database {
    pub conn: Mutex<Connection>,
}

/// Current UTC time truncated to whole seconds, the resolution stored in the
/// database.
pub fn now() -> NaiveDateTime {
    Utc::now().naive_utc().trunc_subsecs(0)
}

impl Database {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    pub fn lock(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database connection lock poisoned".to_string()))
    }

    pub fn initialize(&self) -> AppResult<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            "
            -- Accounts (managed by the auth collaborator)
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE,
                phone TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS restaurants (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (owner_id) REFERENCES users(id)
            );

            -- Employees of a restaurant
            CREATE TABLE IF NOT EXISTS restaurant_staff (
                restaurant_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                PRIMARY KEY (restaurant_id, user_id),
                FOREIGN KEY (restaurant_id) REFERENCES restaurants(id),
                FOREIGN KEY (user_id) REFERENCES users(id)
            );

            -- Menu categories
            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                restaurant_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                UNIQUE (restaurant_id, name),
                FOREIGN KEY (restaurant_id) REFERENCES restaurants(id)
            );

            CREATE TABLE IF NOT EXISTS menu_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                restaurant_id INTEGER NOT NULL,
                category_id INTEGER,
                name TEXT NOT NULL,
                price REAL NOT NULL,
                is_available INTEGER NOT NULL DEFAULT 1,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (restaurant_id) REFERENCES restaurants(id),
                FOREIGN KEY (category_id) REFERENCES categories(id)
            );

            CREATE TABLE IF NOT EXISTS promo_codes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                restaurant_id INTEGER NOT NULL,
                code TEXT NOT NULL UNIQUE,
                discount_type TEXT NOT NULL,
                discount_value REAL NOT NULL,
                minimum_order_amount REAL NOT NULL DEFAULT 0,
                maximum_discount_amount REAL,
                total_usage_limit INTEGER,
                usage_limit_per_customer INTEGER,
                used_count INTEGER NOT NULL DEFAULT 0,
                valid_from DATETIME NOT NULL,
                valid_until DATETIME NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (restaurant_id) REFERENCES restaurants(id)
            );

            CREATE TABLE IF NOT EXISTS promo_code_categories (
                promo_code_id INTEGER NOT NULL,
                category_id INTEGER NOT NULL,
                PRIMARY KEY (promo_code_id, category_id),
                FOREIGN KEY (promo_code_id) REFERENCES promo_codes(id) ON DELETE CASCADE,
                FOREIGN KEY (category_id) REFERENCES categories(id)
            );

            CREATE TABLE IF NOT EXISTS orders (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                order_number TEXT NOT NULL UNIQUE,
                customer_id INTEGER NOT NULL,
                restaurant_id INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                subtotal REAL NOT NULL,
                discount_amount REAL NOT NULL DEFAULT 0,
                total_amount REAL NOT NULL CHECK (total_amount >= 0),
                customer_name TEXT NOT NULL,
                customer_email TEXT NOT NULL,
                customer_phone TEXT NOT NULL,
                delivery_type TEXT NOT NULL,
                delivery_address TEXT,
                payment_method TEXT NOT NULL,
                promo_code_id INTEGER,
                notes TEXT,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL,
                FOREIGN KEY (customer_id) REFERENCES users(id),
                FOREIGN KEY (restaurant_id) REFERENCES restaurants(id),
                FOREIGN KEY (promo_code_id) REFERENCES promo_codes(id)
            );

            CREATE INDEX IF NOT EXISTS idx_orders_restaurant_status
                ON orders (restaurant_id, status);

            -- Order items; price and name are snapshots of the menu item
            CREATE TABLE IF NOT EXISTS order_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                order_id INTEGER NOT NULL,
                menu_item_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                quantity INTEGER NOT NULL CHECK (quantity >= 1),
                price REAL NOT NULL,
                notes TEXT,
                FOREIGN KEY (order_id) REFERENCES orders(id),
                FOREIGN KEY (menu_item_id) REFERENCES menu_items(id)
            );

            CREATE TABLE IF NOT EXISTS shifts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                restaurant_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                starts_at DATETIME NOT NULL,
                ends_at DATETIME NOT NULL,
                note TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                CHECK (ends_at > starts_at),
                FOREIGN KEY (restaurant_id) REFERENCES restaurants(id),
                FOREIGN KEY (user_id) REFERENCES users(id)
            );

            CREATE INDEX IF NOT EXISTS idx_shifts_employee
                ON shifts (restaurant_id, user_id, starts_at);
            ",
        )?;

        // Run migrations for existing databases (pass connection to avoid deadlock)
        Self::migrate_conn(&conn)?;

        Ok(())
    }

    fn migrate_conn(conn: &Connection) -> Result<()> {
        let columns = |table: &str| -> Result<Vec<String>> {
            let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(1))?
                .collect::<Result<Vec<_>>>()?;
            Ok(names)
        };

        // Database files created before per-line notes and per-customer limits
        if !columns("order_items")?.contains(&"notes".to_string()) {
            conn.execute("ALTER TABLE order_items ADD COLUMN notes TEXT", [])?;
        }
        if !columns("promo_codes")?.contains(&"usage_limit_per_customer".to_string()) {
            conn.execute(
                "ALTER TABLE promo_codes ADD COLUMN usage_limit_per_customer INTEGER",
                [],
            )?;
        }

        Ok(())
    }
}
