//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::ServerConfig;
use crate::config::validation::{validate_config, ValidationErrors};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config = parse_config(&content)?;

    tracing::debug!(
        path = %path.display(),
        name = %config.name,
        address = %config.address,
        "Configuration loaded"
    );

    Ok(config)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<ServerConfig, ConfigError> {
    let config: ServerConfig = toml::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}
