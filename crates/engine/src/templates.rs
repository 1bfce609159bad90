//! `${{ ... }}` template resolution for action arguments.
//!
//! Supported expressions:
//! - `environment` and `replicas`
//! - `cluster` and `kube_context`
//! - `credentials.<name>`
//! - `env.<VAR>`
//! - `config.<dotted.path>` into the loaded configuration (credentials excluded)

use serde_json::Value;
use thiserror::Error;

use crate::context::RunContext;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unresolved template references: {}", expressions.join(", "))]
pub struct UnresolvedTemplates {
    pub expressions: Vec<String>,
}

/// Extracts template expressions from a string value.
///
/// Returned expressions do not include `${{` or `}}` delimiters.
pub fn extract_template_expressions(value: &str) -> Vec<String> {
    let mut expressions = Vec::new();
    let mut remainder = value;

    while let Some(start) = remainder.find("${{") {
        let after_start = &remainder[start + 3..];
        let Some(end) = after_start.find("}}") else {
            break;
        };
        let expression = after_start[..end].trim();
        if !expression.is_empty() {
            expressions.push(expression.to_string());
        }
        remainder = &after_start[end + 2..];
    }

    expressions
}

/// Resolve a single expression against the run context.
pub fn resolve_expression(expression: &str, context: &RunContext) -> Option<String> {
    let expression = expression.trim();
    match expression {
        "environment" => return Some(context.environment.as_str().to_string()),
        "replicas" => return Some(context.environment.replicas().to_string()),
        "cluster" => return Some(context.config.cluster.name.clone()),
        "kube_context" => return Some(context.config.cluster.context()),
        _ => {}
    }

    if let Some(name) = expression.strip_prefix("credentials.") {
        return context.credentials().get(name);
    }
    if let Some(variable) = expression.strip_prefix("env.") {
        return std::env::var(variable).ok();
    }
    if let Some(path) = expression.strip_prefix("config.") {
        if path == "credentials" || path.starts_with("credentials.") {
            return None;
        }
        let config = serde_json::to_value(context.config.as_ref()).ok()?;
        let selected = path.split('.').try_fold(&config, |current, segment| current.get(segment))?;
        return match selected {
            Value::String(text) => Some(text.clone()),
            Value::Number(number) => Some(number.to_string()),
            Value::Bool(flag) => Some(flag.to_string()),
            _ => None,
        };
    }
    None
}

/// Replace every template in `value`; fails listing every expression that could not be resolved.
pub fn resolve_templates(value: &str, context: &RunContext) -> Result<String, UnresolvedTemplates> {
    let mut resolved = String::with_capacity(value.len());
    let mut unresolved = Vec::new();
    let mut remainder = value;

    while let Some(start) = remainder.find("${{") {
        let after_start = &remainder[start + 3..];
        let Some(end) = after_start.find("}}") else {
            break;
        };
        resolved.push_str(&remainder[..start]);
        let expression = after_start[..end].trim();
        match resolve_expression(expression, context) {
            Some(text) => resolved.push_str(&text),
            None => unresolved.push(expression.to_string()),
        }
        remainder = &after_start[end + 2..];
    }
    resolved.push_str(remainder);

    if unresolved.is_empty() {
        Ok(resolved)
    } else {
        Err(UnresolvedTemplates { expressions: unresolved })
    }
}
