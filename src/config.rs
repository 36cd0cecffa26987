// src/config.rs
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

pub const ENV_ADDR: &str = "NFC_SERVICE_ADDR";
pub const ENV_OPERATION_TIMEOUT_MS: &str = "NFC_OPERATION_TIMEOUT_MS";
pub const ENV_POLL_INTERVAL_MS: &str = "NFC_POLL_INTERVAL_MS";
pub const ENV_FORMAT_DATA_AREA: &str = "NFC_FORMAT_DATA_AREA";

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid value {value:?} for {key}: {reason}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// WebSocket listen address
    pub listen_addr: SocketAddr,
    /// Upper bound for connect + transfer on a single tag operation
    pub operation_timeout: Duration,
    /// How long the reader loop blocks waiting for status changes
    pub poll_interval: Duration,
    /// Data area size written into the capability container of a blank tag
    pub format_data_area: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 3500)),
            operation_timeout: Duration::from_millis(2000),
            poll_interval: Duration::from_millis(500),
            // MIFARE Ultralight
            format_data_area: 48,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(value) = lookup(ENV_ADDR) {
            config.listen_addr = value
                .parse()
                .map_err(|e: std::net::AddrParseError| invalid(ENV_ADDR, &value, e))?;
        }

        if let Some(value) = lookup(ENV_OPERATION_TIMEOUT_MS) {
            config.operation_timeout = parse_millis(ENV_OPERATION_TIMEOUT_MS, &value)?;
        }

        if let Some(value) = lookup(ENV_POLL_INTERVAL_MS) {
            config.poll_interval = parse_millis(ENV_POLL_INTERVAL_MS, &value)?;
        }

        if let Some(value) = lookup(ENV_FORMAT_DATA_AREA) {
            let size: usize = value
                .parse()
                .map_err(|e: std::num::ParseIntError| invalid(ENV_FORMAT_DATA_AREA, &value, e))?;

            // stored as size / 8 in a single byte
            if size == 0 || size % 8 != 0 || size / 8 > u8::MAX as usize {
                return Err(invalid(
                    ENV_FORMAT_DATA_AREA,
                    &value,
                    "must be a non-zero multiple of 8, at most 2040",
                ));
            }
            config.format_data_area = size;
        }

        Ok(config)
    }
}

fn parse_millis(key: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let millis: u64 = value
        .parse()
        .map_err(|e: std::num::ParseIntError| invalid(key, value, e))?;

    if millis == 0 {
        return Err(invalid(key, value, "must be greater than zero"));
    }
    Ok(Duration::from_millis(millis))
}

fn invalid(key: &'static str, value: &str, reason: impl ToString) -> ConfigError {
    ConfigError {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
