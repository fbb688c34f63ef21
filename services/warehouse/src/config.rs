use std::str::FromStr;

use crate::error::{Error, Result};

/// Connection and load settings, read from the environment.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    pub db_url: String,
    pub max_connections: u32,
    pub load_batch_size: usize,
}

impl WarehouseConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            db_url: std::env::var("DB_URL")
                .map_err(|_| Error::Config("DB_URL env var missing".to_string()))?,
            max_connections: env_or("DB_MAX_CONNECTIONS", 5)?,
            load_batch_size: env_or("LOAD_BATCH_SIZE", 2000)?,
        })
    }
}

/// Reads `key` and parses it, falling back to `default` when unset. A value
/// that is set but does not parse is a configuration error.
pub fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => parse_setting(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_setting<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| Error::Config(format!("{}='{}': {}", key, raw, e)))
}
