use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::status::StatusPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub bind_address: String,
    pub port: u16,
    pub status_policy: StatusPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("restaurant_orders.db"),
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
            status_policy: StatusPolicy::Permissive,
        }
    }
}

impl Config {
    /// Reads `DATABASE_PATH`, `BIND_ADDRESS`, `PORT` and
    /// `ORDER_STATUS_POLICY`, falling back to the defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Config::default();

        if let Some(path) = lookup("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }
        if let Some(address) = lookup("BIND_ADDRESS") {
            config.bind_address = address;
        }
        if let Some(port) = lookup("PORT") {
            config.port = port
                .parse()
                .with_context(|| format!("PORT must be a port number, got `{}`", port))?;
        }
        if let Some(policy) = lookup("ORDER_STATUS_POLICY") {
            config.status_policy = policy
                .parse()
                .context("ORDER_STATUS_POLICY must be `permissive` or `forward_only`")?;
        }

        Ok(config)
    }
}
