//! Shared state handed to every action and probe of a run.

use std::sync::Arc;

use stagehand_types::Environment;
use stagehand_util::config::{Credentials, StagehandConfig};

use crate::{lease::LeaseSet, tools::ToolRunner};

/// Everything a step may consult while executing.
///
/// One context exists per run and is shared by the concurrent members of a group, so all of its
/// mutable state sits behind the lease set's lock.
pub struct RunContext {
    pub config: Arc<StagehandConfig>,
    pub environment: Environment,
    pub tools: Arc<dyn ToolRunner>,
    pub leases: LeaseSet,
    /// Whether an operator can answer prompts.
    pub interactive: bool,
}

impl RunContext {
    pub fn new(config: Arc<StagehandConfig>, environment: Environment, tools: Arc<dyn ToolRunner>) -> Self {
        Self {
            config,
            environment,
            tools,
            leases: LeaseSet::new(),
            interactive: false,
        }
    }

    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn credentials(&self) -> &Credentials {
        &self.config.credentials
    }

    /// kubectl context arguments for the configured cluster.
    pub fn kube_context_args(&self) -> [String; 2] {
        ["--context".to_string(), self.config.cluster.context()]
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("cluster", &self.config.cluster.name)
            .field("environment", &self.environment)
            .field("interactive", &self.interactive)
            .finish_non_exhaustive()
    }
}
