pub mod auth;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod notify;
pub mod promo;
pub mod routes;
pub mod shifts;
pub mod status;
pub mod validation;


use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use std::sync::Arc;

use config::Config;
use db::Database;
use notify::{LogNotifier, OrderNotifier};
use status::StatusPolicy;

/// Shared by every request handler.
pub struct AppState {
    pub db: Database,
    pub notifier: Arc<dyn OrderNotifier>,
    pub status_policy: StatusPolicy,
}

impl AppState {
    pub fn new(db: Database, status_policy: StatusPolicy) -> Self {
        Self {
            db,
            notifier: Arc::new(LogNotifier),
            status_policy,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn OrderNotifier>) -> Self {
        self.notifier = notifier;
        self
    }
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    let db = Database::new(&config.database_path).with_context(|| {
        format!("failed to open database at {}", config.database_path.display())
    })?;
    db.initialize().context("failed to initialize database schema")?;

    tracing::info!(
        database = %config.database_path.display(),
        status_policy = ?config.status_policy,
        "database ready"
    );

    let state = web::Data::new(AppState::new(db, config.status_policy));

    tracing::info!("Starting HTTP server on http://{}:{}", config.bind_address, config.port);

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(routes::json_config())
            .app_data(routes::query_config())
            .wrap(middleware::Logger::default())
            .configure(routes::configure)
    })
    .bind((config.bind_address.as_str(), config.port))?
    .run()
    .await?;

    Ok(())
}
