//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS, comma separated; `*` allows any
    pub client_origin: String,
    /// Map file to load instead of the bundled one
    pub map_path: Option<PathBuf>,

    /// Bounded capacity of each match's event inbox
    pub match_inbox_capacity: usize,
    /// Snapshots queued per connection before it counts as unresponsive
    pub outbound_capacity: usize,
    pub write_timeout: Duration,
    /// Idle deadline for inbound frames
    pub read_timeout: Duration,
    /// Inbound messages per second per connection
    pub input_rate_limit: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Render provides PORT env var, fall back to SERVER_ADDR or default
        let server_addr = match get("PORT") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => get("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:10000".to_string()),
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress(server_addr))?,
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            client_origin: get("CLIENT_ORIGIN").unwrap_or_else(|| "*".to_string()),
            map_path: get("MAP_PATH").filter(|p| !p.trim().is_empty()).map(PathBuf::from),

            match_inbox_capacity: parse_or(&get, "MATCH_INBOX_CAPACITY", 64)?,
            outbound_capacity: parse_or(&get, "OUTBOUND_CAPACITY", 16)?,
            write_timeout: Duration::from_millis(parse_or(&get, "WRITE_TIMEOUT_MS", 1000)?),
            read_timeout: Duration::from_millis(parse_or(&get, "READ_TIMEOUT_MS", 5000)?),
            input_rate_limit: parse_or(&get, "INPUT_RATE_LIMIT", 120)?,
        })
    }
}

fn parse_or<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key, raw)),
        None => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid server address: {0}")]
    InvalidAddress(String),

    #[error("Invalid value for {0}: {1:?}")]
    Invalid(&'static str, String),
}
