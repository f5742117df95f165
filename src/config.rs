use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use log::info;

use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    /// Capacity of each connection's outbound queue. A full queue closes the connection.
    pub outbound_queue_capacity: usize,
    pub max_message_size: usize,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite:live_polls.db".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8080,
            outbound_queue_capacity: 64,
            max_message_size: 64 * 1024,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
        }
    }
}

impl Config {
    /// Read the configuration from the environment (after `.env` has been merged).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let config = Self {
            database_url: lookup("DATABASE_URL").unwrap_or_else(|| {
                info!("DATABASE_URL not set, using default: {}", defaults.database_url);
                defaults.database_url.clone()
            }),
            host: lookup("HOST").unwrap_or_else(|| {
                info!("HOST not set, using default: {}", defaults.host);
                defaults.host.clone()
            }),
            port: parse_or(&lookup, "PORT", defaults.port)?,
            outbound_queue_capacity: parse_or(
                &lookup,
                "OUTBOUND_QUEUE_CAPACITY",
                defaults.outbound_queue_capacity,
            )?,
            max_message_size: parse_or(&lookup, "MAX_MESSAGE_SIZE", defaults.max_message_size)?,
            heartbeat_interval: Duration::from_secs(parse_or(
                &lookup,
                "HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval.as_secs(),
            )?),
            heartbeat_timeout: Duration::from_secs(parse_or(
                &lookup,
                "HEARTBEAT_TIMEOUT_SECS",
                defaults.heartbeat_timeout.as_secs(),
            )?),
        };

        // Both end up in APIs that panic on zero.
        if config.outbound_queue_capacity == 0 {
            return Err(non_zero("OUTBOUND_QUEUE_CAPACITY"));
        }
        if config.heartbeat_interval.is_zero() {
            return Err(non_zero("HEARTBEAT_INTERVAL_SECS"));
        }
        Ok(config)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn non_zero(key: &'static str) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        value: "0".to_string(),
        reason: "must be greater than zero".to_string(),
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Display,
    T::Err: Display,
{
    match lookup(key) {
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key,
            reason: e.to_string(),
            value,
        }),
        None => {
            info!("{} not set, using default: {}", key, default);
            Ok(default)
        }
    }
}
