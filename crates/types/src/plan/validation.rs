//! Structural validation for authored plan documents.
//!
//! Ordering rules (duplicates, unknown dependencies, cycles) are enforced when the engine
//! builds the executable plan; the checks here cover the fields of each step on its own.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use url::Url;

use super::{ActionDefinition, CheckDefinition, PlanDefinition};
use crate::ResourceKind;

static IDENTIFIER_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9._-]*$").expect("identifier pattern is valid"));

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanDefinitionError {
    #[error("invalid plan identifier '{identifier}': use lowercase letters, digits, '.', '_' or '-'")]
    InvalidPlanIdentifier { identifier: String },

    #[error("plan '{plan}' must declare at least one step")]
    NoSteps { plan: String },

    #[error("invalid step identifier '{identifier}' in plan '{plan}'")]
    InvalidStepIdentifier { plan: String, identifier: String },

    #[error("step '{step}': {reason}")]
    InvalidCheck { step: String, reason: String },

    #[error("step '{step}': {reason}")]
    InvalidAction { step: String, reason: String },

    #[error("step '{step}': retry.max_attempts must be at least 1")]
    InvalidRetry { step: String },
}

/// Validate the document-level rules of a plan definition.
pub fn validate_plan_definition(definition: &PlanDefinition) -> Result<(), PlanDefinitionError> {
    if !IDENTIFIER_PATTERN.is_match(&definition.plan) {
        return Err(PlanDefinitionError::InvalidPlanIdentifier {
            identifier: definition.plan.clone(),
        });
    }
    if definition.steps.is_empty() {
        return Err(PlanDefinitionError::NoSteps {
            plan: definition.plan.clone(),
        });
    }

    for step in &definition.steps {
        if !IDENTIFIER_PATTERN.is_match(&step.id) {
            return Err(PlanDefinitionError::InvalidStepIdentifier {
                plan: definition.plan.clone(),
                identifier: step.id.clone(),
            });
        }
        if let Some(precondition) = &step.precondition {
            validate_check(&step.id, precondition)?;
        }
        validate_check(&step.id, &step.postcondition)?;
        if let Some(action) = &step.action {
            validate_action(&step.id, action)?;
        }
        if let Some(retry) = &step.retry
            && retry.max_attempts == 0
        {
            return Err(PlanDefinitionError::InvalidRetry { step: step.id.clone() });
        }
    }

    Ok(())
}

fn validate_check(step: &str, check: &CheckDefinition) -> Result<(), PlanDefinitionError> {
    let invalid = |reason: String| PlanDefinitionError::InvalidCheck {
        step: step.to_string(),
        reason,
    };

    if check.resource.name.trim().is_empty() {
        return Err(invalid(format!("{} check is missing a name", check.resource.kind)));
    }

    if check.resource.kind == ResourceKind::Endpoint {
        let url = Url::parse(&check.resource.name).map_err(|error| invalid(format!("invalid endpoint url '{}': {error}", check.resource.name)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("endpoint url '{}' must use http or https", check.resource.name)));
        }
    } else if !check.accept_status.is_empty() {
        return Err(invalid("accept_status only applies to endpoint checks".to_string()));
    }

    if let Some(code) = check.accept_status.iter().find(|code| !(100..=599).contains(*code)) {
        return Err(invalid(format!("accept_status contains invalid HTTP status {code}")));
    }

    Ok(())
}

fn validate_action(step: &str, action: &ActionDefinition) -> Result<(), PlanDefinitionError> {
    let invalid = |reason: &str| PlanDefinitionError::InvalidAction {
        step: step.to_string(),
        reason: reason.to_string(),
    };

    match action {
        ActionDefinition::Run(command) if command.trim().is_empty() => Err(invalid("run command is empty")),
        ActionDefinition::StripFinalizers { namespace } if namespace.trim().is_empty() => {
            Err(invalid("strip_finalizers needs a namespace"))
        }
        ActionDefinition::PortForward {
            local_port, remote_port, ..
        } if *local_port == 0 || *remote_port == 0 => Err(invalid("port_forward ports must be non-zero")),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Expectation, OnFailure, ResourceRef, RetryPolicy, plan::StepDefinition};

    fn step(id: &str, postcondition: CheckDefinition) -> StepDefinition {
        StepDefinition {
            id: id.into(),
            description: None,
            depends_on: vec![],
            group: None,
            precondition: None,
            action: None,
            postcondition,
            retry: None,
            on_failure: OnFailure::Abort,
            prompt_default: None,
            budget: None,
        }
    }

    fn check(resource: ResourceRef) -> CheckDefinition {
        CheckDefinition {
            resource,
            expect: Expectation::Present,
            accept_status: vec![],
        }
    }

    fn plan(steps: Vec<StepDefinition>) -> PlanDefinition {
        PlanDefinition {
            plan: "demo".into(),
            description: None,
            kind: Default::default(),
            required_credentials: vec![],
            steps,
        }
    }

    #[test]
    fn accepts_minimal_plan() {
        let definition = plan(vec![step("ns", check(ResourceRef::namespace("data")))]);
        assert_eq!(validate_plan_definition(&definition), Ok(()));
    }

    #[test]
    fn rejects_empty_plan() {
        let error = validate_plan_definition(&plan(vec![])).expect_err("no steps");
        assert!(error.to_string().contains("at least one step"));
    }

    #[test]
    fn rejects_non_http_endpoint() {
        let definition = plan(vec![step("api", check(ResourceRef::endpoint("ftp://localhost/health")))]);
        let error = validate_plan_definition(&definition).expect_err("ftp endpoint");
        assert!(error.to_string().contains("must use http or https"), "unexpected error: {error}");
    }

    #[test]
    fn rejects_status_codes_on_non_endpoint_checks() {
        let mut namespace_check = check(ResourceRef::namespace("data"));
        namespace_check.accept_status = vec![200];
        let error = validate_plan_definition(&plan(vec![step("ns", namespace_check)])).expect_err("status on namespace");
        assert!(matches!(error, PlanDefinitionError::InvalidCheck { .. }));
    }

    #[test]
    fn rejects_zero_retry_attempts_and_bad_identifiers() {
        let mut zero_retry = step("ns", check(ResourceRef::namespace("data")));
        zero_retry.retry = Some(RetryPolicy::fixed(0, Default::default()));
        assert_eq!(
            validate_plan_definition(&plan(vec![zero_retry])),
            Err(PlanDefinitionError::InvalidRetry { step: "ns".into() })
        );

        let bad_id = step("Create Namespace", check(ResourceRef::namespace("data")));
        assert!(matches!(
            validate_plan_definition(&plan(vec![bad_id])),
            Err(PlanDefinitionError::InvalidStepIdentifier { .. })
        ));
    }
}
