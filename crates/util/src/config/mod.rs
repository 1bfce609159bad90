//! Configuration management for Stagehand.
//! This module handles parsing, interpolation, and validation of the
//! ~/.config/stagehand/config.yaml file.

mod interpolation;
mod io;
mod model;
mod validation;

pub use interpolation::{InterpolationError, interpolate_config, interpolate_string};
pub use io::{CONFIG_PATH_ENV, default_config_path, load_config_from_path};
pub use model::{
    ChartSettings, ClusterSettings, ConfigError, Credentials, EndpointSettings, GitopsSettings, StagehandConfig, Timeouts,
    ToolPaths,
};
pub use validation::{ValidationError, validate_config};
