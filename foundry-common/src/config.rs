//! Configuration loading and path resolution
//!
//! Settings resolve in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "FOUNDRY_CONFIG";
/// Environment variable overriding the database location
pub const DATABASE_ENV_VAR: &str = "FOUNDRY_DATABASE";
/// Environment variable overriding the listen address
pub const BIND_ENV_VAR: &str = "FOUNDRY_BIND";
/// Listen address used when nothing else is configured
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:5740";

/// Contents of `config.toml`; every key is optional
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub database_path: Option<PathBuf>,
    pub bind_addr: Option<String>,
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
    pub events: EventsConfig,
    pub auto_quench: AutoQuenchConfig,
    pub supply: SupplyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive used when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Connection pool and lock-wait limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub max_connections: u32,
    /// SQLite busy_timeout: how long a statement waits for the write lock
    pub busy_timeout_ms: u64,
    /// How long a request waits for a pooled connection
    pub acquire_timeout_ms: u64,
    /// Upper bound for one stage-post transaction, lock waits included
    pub transaction_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            busy_timeout_ms: 5000,
            acquire_timeout_ms: 5000,
            transaction_timeout_ms: 10000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub dispatch_capacity: usize,
    pub subscriber_buffer: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            dispatch_capacity: 1024,
            subscriber_buffer: 256,
        }
    }
}

/// Background promotion of flasks whose quench time has elapsed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoQuenchConfig {
    pub enabled: bool,
    pub poll_interval_secs: u64,
    /// Grace period after `ready_at` before the sweeper posts quenching
    pub cutover_delay_secs: u64,
}

impl Default for AutoQuenchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: 30,
            cutover_delay_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SupplyConfig {
    /// When set, scrap + fine + alloy must be within this fraction of the
    /// flask's metal weight (0.05 = ±5%)
    pub total_tolerance: Option<f64>,
}

/// Read and parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

    if let Some(tolerance) = config.supply.total_tolerance {
        if !(0.0..1.0).contains(&tolerance) {
            return Err(Error::Config(format!(
                "supply.total_tolerance must be in [0, 1), got {}",
                tolerance
            )));
        }
    }

    Ok(config)
}

/// Serialize a config to disk, creating parent directories
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, content)?;
    Ok(())
}

/// Locate the config file: CLI argument, then `env_var_name`, then the
/// platform default if it exists. `None` means run on defaults.
pub fn resolve_config_file(cli_arg: Option<&Path>, env_var_name: &str) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(env_var_name) {
        return Some(PathBuf::from(path));
    }

    default_config_path().filter(|p| p.exists())
}

/// Resolve the database file location
pub fn resolve_database_path(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    toml: &TomlConfig,
) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        return PathBuf::from(path);
    }

    // Priority 3: TOML config file
    if let Some(path) = &toml.database_path {
        return path.clone();
    }

    // Priority 4: OS-dependent compiled default
    default_database_path()
}

/// Resolve the HTTP listen address, same priority order as the database path
pub fn resolve_bind_addr(cli_arg: Option<&str>, env_var_name: &str, toml: &TomlConfig) -> String {
    if let Some(addr) = cli_arg {
        return addr.to_string();
    }

    if let Ok(addr) = std::env::var(env_var_name) {
        return addr;
    }

    toml.bind_addr
        .clone()
        .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
}

/// `<config dir>/foundry/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("foundry").join("config.toml"))
}

/// `<local data dir>/foundry/foundry.db`
fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("foundry"))
        .unwrap_or_else(|| PathBuf::from("./foundry_data"))
        .join("foundry.db")
}
