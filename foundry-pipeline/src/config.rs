//! Runtime configuration for the pipeline service
//!
//! Resolution order for every setting: command line, then environment
//! variable, then TOML file, then compiled default.

use crate::error::{Error, Result};
use foundry_common::config::{
    default_config_path, load_toml_config, resolve_bind_addr, resolve_config_file,
    resolve_database_path, TomlConfig, BIND_ENV_VAR, CONFIG_ENV_VAR, DATABASE_ENV_VAR,
};
use std::path::{Path, PathBuf};

/// Fully resolved service configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub bind_addr: String,
    /// TOML file the settings came from, if any
    pub config_file: Option<PathBuf>,
    pub settings: TomlConfig,
}

impl Config {
    /// Resolve configuration from command-line values plus environment and file
    ///
    /// An explicitly named config file (CLI or `FOUNDRY_CONFIG`) must exist;
    /// the default location is optional.
    pub fn resolve(cli_config: Option<&Path>, cli_database: Option<&Path>, cli_bind: Option<&str>) -> Result<Self> {
        let (config_file, settings) = match resolve_config_file(cli_config, CONFIG_ENV_VAR) {
            Some(path) => {
                if !path.exists() {
                    return Err(Error::Config(format!("config file not found: {}", path.display())));
                }
                let settings = load_toml_config(&path)?;
                (Some(path), settings)
            }
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => {
                    let settings = load_toml_config(&path)?;
                    (Some(path), settings)
                }
                None => (None, TomlConfig::default()),
            },
        };

        let database_path = resolve_database_path(cli_database, DATABASE_ENV_VAR, &settings);
        let bind_addr = resolve_bind_addr(cli_bind, BIND_ENV_VAR, &settings);

        Ok(Self {
            database_path,
            bind_addr,
            config_file,
            settings,
        })
    }
}
