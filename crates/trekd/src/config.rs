//! Daemon configuration.
//!
//! Sources, lowest precedence first:
//!
//! 1. Built-in defaults
//! 2. An optional TOML file (`--config` or `TREK_CONFIG`)
//! 3. Environment overrides:
//!    - `TREK_CHAT_ADDR`  (default: "0.0.0.0:8080")
//!    - `TREK_ADMIN_ADDR` (default: "127.0.0.1:8081")
//!    - `TREK_MAX_CONNECTIONS` (default: "1024")
//! 4. Command-line flags, applied by the binary
//!
//! Every field is optional in the file.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use trek_core::ParticipantName;

use crate::naming::{
    DEFAULT_POOL, DEFAULT_POOL_ATTEMPTS, DEFAULT_SYNTHETIC_PREFIX, DEFAULT_SYNTHETIC_RANGE,
};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "TREK_CONFIG";

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {error}")]
    Read { path: PathBuf, error: std::io::Error },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Chat listener address
    pub chat_addr: SocketAddr,

    /// Admin HTTP listener address
    pub admin_addr: SocketAddr,

    /// Concurrent client connections accepted before new ones are refused
    pub max_connections: usize,

    /// Upper bound for writing one envelope to a client
    pub write_timeout_ms: u64,

    /// Share of human messages rewritten with scripted flavor text
    pub enhance_probability: f64,

    pub naming: NamingConfig,

    pub bots: BotConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chat_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            admin_addr: SocketAddr::from(([127, 0, 0, 1], 8081)),
            max_connections: 1024,
            write_timeout_ms: 10_000,
            enhance_probability: 0.5,
            naming: NamingConfig::default(),
            bots: BotConfig::default(),
        }
    }
}

/// Name allocation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConfig {
    pub pool: Vec<String>,
    pub attempts: usize,
    pub synthetic_prefix: String,
    pub synthetic_range: u32,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            pool: DEFAULT_POOL.iter().map(|n| (*n).to_string()).collect(),
            attempts: DEFAULT_POOL_ATTEMPTS,
            synthetic_prefix: DEFAULT_SYNTHETIC_PREFIX.to_string(),
            synthetic_range: DEFAULT_SYNTHETIC_RANGE,
        }
    }
}

/// Scripted bot settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub enabled: bool,

    /// One scripted bot per name
    pub names: Vec<String>,

    pub min_interval_ms: u64,
    pub max_interval_ms: u64,

    pub stall: StallConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            names: DEFAULT_POOL.iter().map(|n| (*n).to_string()).collect(),
            min_interval_ms: 5_000,
            max_interval_ms: 35_000,
            stall: StallConfig::default(),
        }
    }
}

impl BotConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }
}

/// Stall bot settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StallConfig {
    pub enabled: bool,
    pub name: String,

    /// Iterations between two stalls
    pub every: u64,

    /// Length of one stall
    pub pause_ms: u64,

    /// Delay between two self-addressed messages
    pub send_interval_ms: u64,
}

impl Default for StallConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name: "not_romulan".to_string(),
            every: 10_000,
            pause_ms: 2_000,
            send_interval_ms: 10,
        }
    }
}

impl Config {
    /// Loads defaults, the optional file and the environment.
    ///
    /// With `path` unset, `TREK_CONFIG` is consulted. A missing variable
    /// means defaults only; a named file that cannot be read is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(&path)
                    .map_err(|error| ConfigError::Read { path, error })?;
                Self::from_toml_str(&text)?
            }
            None => Self::default(),
        };

        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Applies overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from `lookup`.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = parse_env(&lookup, "TREK_CHAT_ADDR")? {
            self.chat_addr = addr;
        }
        if let Some(addr) = parse_env(&lookup, "TREK_ADMIN_ADDR")? {
            self.admin_addr = addr;
        }
        if let Some(max) = parse_env(&lookup, "TREK_MAX_CONNECTIONS")? {
            self.max_connections = max;
        }
        Ok(())
    }

    /// Rejects values the daemon cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(invalid("max_connections", "must be at least 1"));
        }
        if self.write_timeout_ms == 0 {
            return Err(invalid("write_timeout_ms", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.enhance_probability) {
            return Err(invalid("enhance_probability", "must be between 0 and 1"));
        }
        if self.naming.synthetic_prefix.is_empty() {
            return Err(invalid("naming.synthetic_prefix", "must not be empty"));
        }
        if self.naming.synthetic_range == 0 {
            return Err(invalid("naming.synthetic_range", "must be at least 1"));
        }
        if self.bots.min_interval_ms > self.bots.max_interval_ms {
            return Err(invalid(
                "bots.min_interval_ms",
                "must not exceed bots.max_interval_ms",
            ));
        }
        if self.bots.stall.every == 0 {
            return Err(invalid("bots.stall.every", "must be at least 1"));
        }

        check_names("naming.pool", &self.naming.pool)?;
        check_names("bots.names", &self.bots.names)?;
        check_names("bots.stall.name", std::slice::from_ref(&self.bots.stall.name))?;
        ParticipantName::parse(&self.naming.synthetic_prefix)
            .map_err(|e| invalid("naming.synthetic_prefix", &e.to_string()))?;
        Ok(())
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn check_names(key: &str, names: &[String]) -> Result<(), ConfigError> {
    for name in names {
        ParticipantName::parse(name).map_err(|e| invalid(key, &e.to_string()))?;
    }
    Ok(())
}

fn parse_env<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) => value.trim().parse::<T>().map(Some).map_err(|e| ConfigError::Invalid {
            key: key.to_string(),
            reason: e.to_string(),
        }),
        None => Ok(None),
    }
}
