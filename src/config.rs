//! Server configuration
use std::{net::SocketAddr, path::PathBuf, time::Duration};

use log::LevelFilter;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

const CONFIG_FILE: &str = "ironkey";
const ENV_PREFIX: &str = "IRONKEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSettings,
    pub cors: CorsSettings,
    pub database: DatabaseSettings,
    pub hashing: HashingSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub address: SocketAddr,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorsSettings {
    pub allowed_origin: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: PathBuf,
    /// Upper bound on open connections in the pool.
    pub max_connections: u32,
    /// Idle connections the pool keeps warm. Anything above this is closed
    /// once it has sat idle for `idle_timeout`.
    pub min_idle: u32,
    #[serde(deserialize_with = "duration")]
    pub idle_timeout: Duration,
    /// How long a request waits for a free connection.
    #[serde(deserialize_with = "duration")]
    pub connection_timeout: Duration,
}

/// Argon2 work factor.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HashingSettings {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    #[serde(deserialize_with = "level")]
    pub level: LevelFilter,
}

impl Config {
    /// Load configuration from `ironkey.toml` (if present) and the environment.
    ///
    /// Environment variables use a double underscore between sections,
    /// e.g. `IRONKEY__DATABASE__MAX_CONNECTIONS=20`.
    pub fn load() -> Result<Config, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(CONFIG_FILE).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            address: SocketAddr::from(([127, 0, 0, 1], 8080)),
        }
    }
}

impl Default for CorsSettings {
    fn default() -> Self {
        CorsSettings {
            allowed_origin: "http://localhost:5173".to_string(),
        }
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: PathBuf::from("./ironkey.sqlite3"),
            max_connections: 10,
            min_idle: 0,
            idle_timeout: Duration::from_secs(5 * 60),
            connection_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for HashingSettings {
    fn default() -> Self {
        // argon2 crate defaults (19 MiB, 2 passes, 1 lane)
        HashingSettings {
            memory_kib: argon2::Params::DEFAULT_M_COST,
            iterations: argon2::Params::DEFAULT_T_COST,
            parallelism: argon2::Params::DEFAULT_P_COST,
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        LogSettings {
            level: LevelFilter::Info,
        }
    }
}

/// Parse a human readable duration such as `5m` or `30s`.
fn duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let text = String::deserialize(deserializer)?;
    humantime::parse_duration(&text).map_err(serde::de::Error::custom)
}

fn level<'de, D: Deserializer<'de>>(deserializer: D) -> Result<LevelFilter, D::Error> {
    let text = String::deserialize(deserializer)?;
    text.parse().map_err(serde::de::Error::custom)
}
