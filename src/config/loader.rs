//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use serde_json::Value;
use thiserror::Error;

use crate::config::schema::ServerConfig;
use crate::config::validation::{validate_config, ConfigProblem};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation failed: {}", join_problems(.0))]
    Validation(Vec<ConfigProblem>),
}

fn join_problems(problems: &[ConfigProblem]) -> String {
    problems
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse configuration text; `.json` files are JSON, anything else TOML.
pub fn parse_config(path: &Path, content: &str) -> Result<ServerConfig, ConfigError> {
    let is_json = path
        .extension()
        .is_some_and(|extension| extension.eq_ignore_ascii_case("json"));
    if is_json {
        serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    } else {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

/// Load and validate configuration from a file.
///
/// Relative `cwd` values, server-wide or per mapping, are resolved against
/// the file's directory.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config = parse_config(path, &content)?;

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    if config.server.cwd.is_relative() {
        config.server.cwd = base.join(&config.server.cwd);
    }
    for mapping in &mut config.mappings {
        resolve_mapping_cwd(mapping, base);
    }

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

fn resolve_mapping_cwd(mapping: &mut Value, base: &Path) {
    let Some(Value::String(cwd)) = mapping.get_mut("cwd") else {
        return;
    };
    if Path::new(cwd.as_str()).is_relative() {
        *cwd = base.join(cwd.as_str()).to_string_lossy().into_owned();
    }
}
