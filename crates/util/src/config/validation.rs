//! Configuration validation.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::debug;
use url::Url;

use super::StagehandConfig;

static CLUSTER_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?$").expect("cluster name pattern is valid"));
static CREDENTIAL_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("credential name pattern is valid"));

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid cluster name '{name}': use lowercase letters, digits, and inner hyphens")]
    InvalidClusterName { name: String },

    #[error("Tool '{tool}' has an empty binary path")]
    EmptyToolPath { tool: String },

    #[error("Invalid endpoint {field} '{value}': {reason}")]
    InvalidEndpoint { field: String, value: String, reason: String },

    #[error("Invalid credential name '{name}': use lowercase letters, digits, and underscores")]
    InvalidCredentialName { name: String },

    #[error("{field} must be greater than zero")]
    ZeroDuration { field: String },

    #[error("retry.max_attempts must be at least 1")]
    InvalidRetry,
}

/// Validate the entire configuration.
pub fn validate_config(config: &StagehandConfig) -> Result<(), ValidationError> {
    if !CLUSTER_NAME.is_match(&config.cluster.name) {
        return Err(ValidationError::InvalidClusterName {
            name: config.cluster.name.clone(),
        });
    }

    for (tool, binary) in config.tools.iter() {
        if binary.trim().is_empty() {
            return Err(ValidationError::EmptyToolPath { tool: tool.to_string() });
        }
    }

    validate_endpoint("endpoints.api_health", &config.endpoints.api_health)?;
    validate_endpoint("endpoints.jenkins", &config.endpoints.jenkins)?;
    validate_endpoint("endpoints.argocd", &config.endpoints.argocd)?;

    for name in config.credentials.names() {
        if !CREDENTIAL_NAME.is_match(name) {
            return Err(ValidationError::InvalidCredentialName { name: name.to_string() });
        }
    }

    if config.timeouts.probe.is_zero() {
        return Err(ValidationError::ZeroDuration {
            field: "timeouts.probe".into(),
        });
    }
    if config.timeouts.tool.is_zero() {
        return Err(ValidationError::ZeroDuration { field: "timeouts.tool".into() });
    }
    if config.timeouts.plan.is_some_and(|plan| plan.is_zero()) {
        return Err(ValidationError::ZeroDuration { field: "timeouts.plan".into() });
    }
    if config.retry.max_attempts == 0 {
        return Err(ValidationError::InvalidRetry);
    }

    debug!(cluster = %config.cluster.name, "Validated configuration");
    Ok(())
}

fn validate_endpoint(field: &str, value: &str) -> Result<(), ValidationError> {
    let invalid = |reason: String| ValidationError::InvalidEndpoint {
        field: field.to_string(),
        value: value.to_string(),
        reason,
    };
    let url = Url::parse(value).map_err(|error| invalid(error.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn default_configuration_is_valid() {
        assert_eq!(validate_config(&StagehandConfig::default()), Ok(()));
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = StagehandConfig::default();
        config.cluster.name = "Dota2_ML".into();
        assert!(matches!(validate_config(&config), Err(ValidationError::InvalidClusterName { .. })));

        let mut config = StagehandConfig::default();
        config.endpoints.argocd = "localhost:8443".into();
        assert!(matches!(validate_config(&config), Err(ValidationError::InvalidEndpoint { .. })));

        let mut config = StagehandConfig::default();
        config.tools.helm = " ".into();
        assert_eq!(
            validate_config(&config),
            Err(ValidationError::EmptyToolPath { tool: "helm".into() })
        );

        let mut config = StagehandConfig::default();
        config.timeouts.plan = Some(Duration::ZERO);
        assert!(matches!(validate_config(&config), Err(ValidationError::ZeroDuration { .. })));

        let mut config = StagehandConfig::default();
        config.credentials.insert("Mongo-Password", "x");
        assert!(matches!(validate_config(&config), Err(ValidationError::InvalidCredentialName { .. })));
    }
}
