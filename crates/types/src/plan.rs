//! Authoring schema for plan documents.
//!
//! Plan documents are YAML or JSON files that describe the same steps the built-in catalog
//! constructs in code. The engine converts a [`PlanDefinition`] into an executable plan after
//! [`validation::validate_plan_definition`] accepts it.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Expectation, FailureDecision, OnFailure, ResourceRef, RetryPolicy, duration};

pub mod validation;

/// Goal a plan serves; teardown plans honor `--keep`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanKind {
    #[default]
    Provision,
    Teardown,
    Status,
}

/// A whole plan document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanDefinition {
    /// Plan identifier used on the command line (for example `data-plane`).
    pub plan: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub kind: PlanKind,
    /// Credential names that must be configured before the plan may start.
    #[serde(default)]
    pub required_credentials: Vec<String>,
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

/// One authored step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Unique step identifier within the plan.
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Steps sharing a group name run concurrently.
    #[serde(default)]
    pub group: Option<String>,
    /// When this check is already ready the step is skipped.
    #[serde(default)]
    pub precondition: Option<CheckDefinition>,
    /// Written as a single-key map such as `run: kubectl create namespace data`.
    #[serde(default, with = "single_key_action", skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionDefinition>,
    pub postcondition: CheckDefinition,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    #[serde(default)]
    pub on_failure: OnFailure,
    /// Resolution of a `prompt` policy when no operator is available.
    #[serde(default)]
    pub prompt_default: Option<FailureDecision>,
    /// Wall-clock budget for the whole step.
    #[serde(default, with = "duration::text_option")]
    pub budget: Option<Duration>,
}

/// A probe target plus what the check expects to see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckDefinition {
    #[serde(flatten)]
    pub resource: ResourceRef,
    #[serde(default)]
    pub expect: Expectation,
    /// Accepted HTTP status codes for endpoint checks; empty means 200-399.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accept_status: Vec<u16>,
}

/// Work performed between the precondition and the postcondition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionDefinition {
    /// A command line such as `kubectl create namespace data`; `${{ ... }}` templates are resolved at run time.
    Run(String),
    /// Clear the finalizers of a namespace stuck in `Terminating`.
    StripFinalizers { namespace: String },
    /// Hold a `kubectl port-forward` open for the rest of the run.
    PortForward {
        target: String,
        namespace: String,
        local_port: u16,
        remote_port: u16,
    },
}

/// YAML spells externally tagged enums as `!tag` by default; plan documents use `{variant: value}` maps
/// in both YAML and JSON.
mod single_key_action {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::ActionDefinition;

    #[derive(Serialize)]
    #[serde(transparent)]
    struct Borrowed<'a>(#[serde(with = "serde_yaml::with::singleton_map")] &'a ActionDefinition);

    #[derive(Deserialize)]
    #[serde(transparent)]
    struct Owned(#[serde(with = "serde_yaml::with::singleton_map")] ActionDefinition);

    pub fn serialize<S: Serializer>(action: &Option<ActionDefinition>, serializer: S) -> Result<S::Ok, S::Error> {
        action.as_ref().map(Borrowed).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<ActionDefinition>, D::Error> {
        Ok(Option::<Owned>::deserialize(deserializer)?.map(|Owned(action)| action))
    }
}
