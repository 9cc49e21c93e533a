//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::{DynamicConfig, StaticConfig};
use crate::config::validation::{validate_dynamic, validate_static, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate the static configuration. Any error here is fatal.
pub fn load_static(path: &Path) -> Result<StaticConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_static(&content)
}

/// Parse and validate a static configuration document.
pub fn parse_static(content: &str) -> Result<StaticConfig, ConfigError> {
    let config: StaticConfig = toml::from_str(content)?;
    validate_static(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate a dynamic configuration file.
pub fn load_dynamic(path: &Path, static_config: &StaticConfig) -> Result<DynamicConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_dynamic(&content, static_config)
}

/// Parse and validate a dynamic configuration document.
pub fn parse_dynamic(content: &str, static_config: &StaticConfig) -> Result<DynamicConfig, ConfigError> {
    let config: DynamicConfig = toml::from_str(content)?;
    validate_dynamic(&config, static_config).map_err(ConfigError::Validation)?;
    Ok(config)
}
