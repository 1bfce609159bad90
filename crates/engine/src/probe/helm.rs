//! Helm release probe.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::Value;
use stagehand_types::{ReadinessState, ResourceKind, ResourceRef};

use super::{Probe, ProbeError, classify_failure};
use crate::tools::{Invocation, ToolRunner};

pub struct HelmReleaseProbe {
    tools: Arc<dyn ToolRunner>,
    context: String,
    timeout: Duration,
}

impl HelmReleaseProbe {
    pub fn new(tools: Arc<dyn ToolRunner>, context: impl Into<String>, timeout: Duration) -> Self {
        Self {
            tools,
            context: context.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Probe for HelmReleaseProbe {
    fn name(&self) -> &str {
        "helm"
    }

    async fn check(&self, resource: &ResourceRef) -> Result<ReadinessState, ProbeError> {
        if resource.kind != ResourceKind::Release {
            return Ok(ReadinessState::Absent);
        }
        let invocation = Invocation::new(
            "helm",
            [
                "status",
                resource.name.as_str(),
                "-n",
                resource.namespace_or_default(),
                "--kube-context",
                self.context.as_str(),
                "-o",
                "json",
            ],
        )
        .with_timeout(self.timeout);

        let output = self.tools.run(&invocation).await?;
        if !output.success() {
            return classify_failure(&output.stderr);
        }
        let status: Value = serde_json::from_str(&output.stdout)
            .map_err(|error| ProbeError::Transient(format!("unreadable helm status for {resource}: {error}")))?;
        Ok(release_state(&status))
    }
}

/// Map `helm status -o json` onto readiness.
pub fn release_state(status: &Value) -> ReadinessState {
    match status.pointer("/info/status").and_then(Value::as_str).unwrap_or_default() {
        "deployed" => ReadinessState::Ready,
        "failed" => ReadinessState::Failed,
        "superseded" | "uninstalled" => ReadinessState::Absent,
        // uninstalling, pending-install, pending-upgrade, pending-rollback
        _ => ReadinessState::Pending,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testing::ScriptedTools;

    #[test]
    fn maps_release_statuses() {
        let state = |status: &str| release_state(&json!({"info": {"status": status}}));
        assert_eq!(state("deployed"), ReadinessState::Ready);
        assert_eq!(state("pending-install"), ReadinessState::Pending);
        assert_eq!(state("pending-upgrade"), ReadinessState::Pending);
        assert_eq!(state("uninstalling"), ReadinessState::Pending);
        assert_eq!(state("failed"), ReadinessState::Failed);
        assert_eq!(state("uninstalled"), ReadinessState::Absent);
        assert_eq!(state("superseded"), ReadinessState::Absent);
    }

    #[tokio::test]
    async fn missing_release_is_absent() {
        let tools = Arc::new(ScriptedTools::new());
        tools.fail(
            "helm status mongodb -n data --kube-context kind-dota2-ml -o json",
            1,
            "Error: release: not found",
        );
        let probe = HelmReleaseProbe::new(tools, "kind-dota2-ml", Duration::from_secs(5));
        assert_eq!(
            probe.check(&ResourceRef::release("mongodb", "data")).await,
            Ok(ReadinessState::Absent)
        );
    }
}
