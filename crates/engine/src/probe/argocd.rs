//! ArgoCD application probe.
//!
//! Reads the `Application` custom resource through kubectl so no `argocd login` session is needed.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::Value;
use stagehand_types::{ReadinessState, ResourceKind, ResourceRef};

use super::{Probe, ProbeError, classify_failure};
use crate::tools::{Invocation, ToolRunner};

pub struct ApplicationProbe {
    tools: Arc<dyn ToolRunner>,
    context: String,
    timeout: Duration,
}

impl ApplicationProbe {
    pub fn new(tools: Arc<dyn ToolRunner>, context: impl Into<String>, timeout: Duration) -> Self {
        Self {
            tools,
            context: context.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Probe for ApplicationProbe {
    fn name(&self) -> &str {
        "argocd"
    }

    async fn check(&self, resource: &ResourceRef) -> Result<ReadinessState, ProbeError> {
        if resource.kind != ResourceKind::Application {
            return Ok(ReadinessState::Absent);
        }
        let namespace = resource.namespace.as_deref().unwrap_or("argocd");
        let invocation = Invocation::new(
            "kubectl",
            [
                "--context",
                self.context.as_str(),
                "get",
                "applications.argoproj.io",
                resource.name.as_str(),
                "-n",
                namespace,
                "-o",
                "json",
            ],
        )
        .with_timeout(self.timeout);

        let output = self.tools.run(&invocation).await?;
        if !output.success() {
            return classify_failure(&output.stderr);
        }
        let application: Value = serde_json::from_str(&output.stdout)
            .map_err(|error| ProbeError::Transient(format!("unreadable application {resource}: {error}")))?;
        Ok(application_state(&application))
    }
}

/// Healthy and synced is ready; degraded is failed; anything else is still converging.
pub fn application_state(application: &Value) -> ReadinessState {
    let health = application.pointer("/status/health/status").and_then(Value::as_str);
    let sync = application.pointer("/status/sync/status").and_then(Value::as_str);
    match (health, sync) {
        (Some("Degraded"), _) => ReadinessState::Failed,
        (Some("Healthy"), Some("Synced")) => ReadinessState::Ready,
        _ => ReadinessState::Pending,
    }
}
