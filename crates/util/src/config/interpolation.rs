//! Configuration interpolation for environment variables.
//!
//! String settings may reference the environment as `${env:NAME}`. Credentials whose variable is
//! unset are dropped so that plans requiring them fail the presence check instead of running with
//! an empty secret.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use thiserror::Error;
use tracing::{debug, warn};

use super::StagehandConfig;

static ENV_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{env:([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid"));

/// Errors that can occur during interpolation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InterpolationError {
    #[error("Missing environment variable: {name} (referenced by {field})")]
    MissingEnvVar { name: String, field: String },
}

/// Interpolate environment references in every string setting of the configuration.
pub fn interpolate_config(config: &mut StagehandConfig) -> Result<(), InterpolationError> {
    if let Some(context) = config.cluster.kube_context.as_mut() {
        *context = interpolate_field(context, "cluster.kube_context")?;
    }
    config.endpoints.api_health = interpolate_field(&config.endpoints.api_health, "endpoints.api_health")?;
    config.endpoints.jenkins = interpolate_field(&config.endpoints.jenkins, "endpoints.jenkins")?;
    config.endpoints.argocd = interpolate_field(&config.endpoints.argocd, "endpoints.argocd")?;
    if let Some(repo_url) = config.gitops.repo_url.as_mut() {
        *repo_url = interpolate_field(repo_url, "gitops.repo_url")?;
    }

    let mut unresolved = Vec::new();
    for (name, value) in config.credentials.values_mut() {
        match interpolate_string(value) {
            Ok(resolved) => {
                *value = resolved;
                debug!(credential = %name, "Interpolated credential -> [REDACTED]");
            }
            Err(error) => {
                warn!(credential = %name, %error, "Credential left unset");
                unresolved.push(name.clone());
            }
        }
    }
    for name in unresolved {
        config.credentials.remove(&name);
    }
    Ok(())
}

fn interpolate_field(value: &str, field: &str) -> Result<String, InterpolationError> {
    interpolate_string(value).map_err(|InterpolationError::MissingEnvVar { name, .. }| InterpolationError::MissingEnvVar {
        name,
        field: field.to_string(),
    })
}

/// Replace every `${env:NAME}` in `value` with the variable's contents.
pub fn interpolate_string(value: &str) -> Result<String, InterpolationError> {
    let mut missing = None;
    let resolved = ENV_PLACEHOLDER.replace_all(value, |caps: &Captures| match std::env::var(&caps[1]) {
        Ok(found) => found,
        Err(_) => {
            missing.get_or_insert_with(|| caps[1].to_string());
            String::new()
        }
    });
    match missing {
        Some(name) => Err(InterpolationError::MissingEnvVar {
            name,
            field: "value".to_string(),
        }),
        None => Ok(resolved.into_owned()),
    }
}
