//! Configuration IO helpers.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use dirs_next::config_dir;
use tracing::debug;

use super::{ConfigError, StagehandConfig, interpolate_config, validate_config};
use crate::expand_tilde;

/// Environment variable that points at an alternate configuration file.
pub const CONFIG_PATH_ENV: &str = "STAGEHAND_CONFIG_PATH";

/// Returns the default path for the configuration file.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_PATH_ENV)
        && !path.trim().is_empty()
    {
        return expand_tilde(&path);
    }

    config_dir().unwrap_or_else(|| PathBuf::from(".")).join("stagehand").join("config.yaml")
}

/// Loads configuration from a specific path. A missing file yields the defaults.
///
/// Files ending in `.json` are parsed as JSON; anything else as YAML.
pub fn load_config_from_path(path: &Path) -> Result<StagehandConfig, ConfigError> {
    let mut config = if path.exists() {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        parse_config(path, &content)?
    } else {
        debug!(path = %path.display(), "No configuration file; using defaults");
        StagehandConfig::default()
    };

    interpolate_config(&mut config)?;
    validate_config(&config)?;
    Ok(config)
}

fn parse_config(path: &Path, content: &str) -> Result<StagehandConfig, ConfigError> {
    let parse_error = |message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    };
    let is_json = path.extension().is_some_and(|extension| extension.eq_ignore_ascii_case("json"));
    if is_json {
        serde_json::from_str(content).map_err(|error| parse_error(error.to_string()))
    } else if content.trim().is_empty() {
        Ok(StagehandConfig::default())
    } else {
        serde_yaml::from_str(content).map_err(|error| parse_error(error.to_string()))
    }
}
