//! Probes answered by `kubectl get -o json`.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::Value;
use stagehand_types::{ReadinessState, ResourceKind, ResourceRef};
use tracing::debug;

use super::{Probe, ProbeError, classify_failure};
use crate::tools::{Invocation, ToolRunner};

/// Container waiting reasons that will not resolve by waiting.
const TERMINAL_WAIT_REASONS: [&str; 4] = ["CrashLoopBackOff", "ImagePullBackOff", "ErrImagePull", "CreateContainerConfigError"];

pub struct KubectlProbe {
    tools: Arc<dyn ToolRunner>,
    context: String,
    timeout: Duration,
}

impl KubectlProbe {
    pub fn new(tools: Arc<dyn ToolRunner>, context: impl Into<String>, timeout: Duration) -> Self {
        Self {
            tools,
            context: context.into(),
            timeout,
        }
    }

    fn invocation(&self, resource: &ResourceRef) -> Option<Invocation> {
        let mut args: Vec<String> = vec!["--context".into(), self.context.clone(), "get".into()];
        match resource.kind {
            ResourceKind::Namespace => args.extend(["namespace".into(), resource.name.clone()]),
            ResourceKind::Crd => args.extend(["crd".into(), resource.name.clone()]),
            ResourceKind::Secret => args.extend(["secret".into(), resource.name.clone()]),
            ResourceKind::Deployment => args.extend(["deployment".into(), resource.name.clone()]),
            ResourceKind::StatefulSet => args.extend(["statefulset".into(), resource.name.clone()]),
            ResourceKind::Pods => args.extend(["pods".into(), "-l".into(), resource.name.clone()]),
            _ => return None,
        }
        if resource.kind.is_namespaced() {
            args.extend(["-n".into(), resource.namespace_or_default().to_string()]);
        }
        args.extend(["-o".into(), "json".into()]);
        Some(Invocation::new("kubectl", args).with_timeout(self.timeout))
    }
}

#[async_trait]
impl Probe for KubectlProbe {
    fn name(&self) -> &str {
        "kubectl"
    }

    async fn check(&self, resource: &ResourceRef) -> Result<ReadinessState, ProbeError> {
        let Some(invocation) = self.invocation(resource) else {
            return Ok(ReadinessState::Absent);
        };
        let output = self.tools.run(&invocation).await?;
        if !output.success() {
            debug!(resource = %resource, stderr = %output.message(), "kubectl get failed");
            return classify_failure(&output.stderr);
        }
        let document: Value = serde_json::from_str(&output.stdout)
            .map_err(|error| ProbeError::Transient(format!("unreadable kubectl output for {resource}: {error}")))?;

        Ok(match resource.kind {
            ResourceKind::Namespace => namespace_state(&document),
            ResourceKind::Deployment | ResourceKind::StatefulSet => workload_state(&document),
            ResourceKind::Pods => pods_state(&document),
            _ => ReadinessState::Ready,
        })
    }
}

/// A namespace being deleted is still present but no longer usable.
pub fn namespace_state(namespace: &Value) -> ReadinessState {
    match namespace.pointer("/status/phase").and_then(Value::as_str) {
        Some("Terminating") => ReadinessState::Pending,
        _ => ReadinessState::Ready,
    }
}

/// Rollout state of a Deployment or StatefulSet.
pub fn workload_state(workload: &Value) -> ReadinessState {
    let conditions = workload.pointer("/status/conditions").and_then(Value::as_array);
    let deadline_exceeded = conditions.into_iter().flatten().any(|condition| {
        condition.get("type").and_then(Value::as_str) == Some("Progressing")
            && condition.get("status").and_then(Value::as_str) == Some("False")
            && condition.get("reason").and_then(Value::as_str) == Some("ProgressDeadlineExceeded")
    });
    if deadline_exceeded {
        return ReadinessState::Failed;
    }

    let desired = workload.pointer("/spec/replicas").and_then(Value::as_u64).unwrap_or(1);
    let ready = workload.pointer("/status/readyReplicas").and_then(Value::as_u64).unwrap_or(0);
    let generation = workload.pointer("/metadata/generation").and_then(Value::as_u64).unwrap_or(0);
    let observed = workload
        .pointer("/status/observedGeneration")
        .and_then(Value::as_u64)
        .unwrap_or(generation);

    if observed >= generation && ready == desired {
        ReadinessState::Ready
    } else {
        ReadinessState::Pending
    }
}

/// Aggregate state of the pods matched by a label selector.
pub fn pods_state(pods: &Value) -> ReadinessState {
    let items = pods.get("items").and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default();
    if items.is_empty() {
        return ReadinessState::Absent;
    }

    let statuses = |pod: &Value| -> Vec<Value> {
        ["/status/initContainerStatuses", "/status/containerStatuses"]
            .iter()
            .filter_map(|pointer| pod.pointer(pointer).and_then(Value::as_array))
            .flatten()
            .cloned()
            .collect()
    };

    let stuck = items.iter().flat_map(statuses).any(|status| {
        status
            .pointer("/state/waiting/reason")
            .and_then(Value::as_str)
            .is_some_and(|reason| TERMINAL_WAIT_REASONS.contains(&reason))
    });
    if stuck {
        return ReadinessState::Failed;
    }

    let any_ready = items.iter().any(|pod| {
        let running = pod.pointer("/status/phase").and_then(Value::as_str) == Some("Running");
        let terminating = pod.pointer("/metadata/deletionTimestamp").is_some();
        let containers = pod.pointer("/status/containerStatuses").and_then(Value::as_array);
        let all_ready = containers.is_some_and(|containers| {
            !containers.is_empty()
                && containers
                    .iter()
                    .all(|container| container.get("ready").and_then(Value::as_bool) == Some(true))
        });
        running && !terminating && all_ready
    });

    if any_ready {
        ReadinessState::Ready
    } else {
        ReadinessState::Pending
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testing::ScriptedTools;

    #[test]
    fn terminating_namespace_is_pending() {
        assert_eq!(namespace_state(&json!({"status": {"phase": "Active"}})), ReadinessState::Ready);
        assert_eq!(namespace_state(&json!({"status": {"phase": "Terminating"}})), ReadinessState::Pending);
    }

    #[test]
    fn workload_ready_when_replicas_match() {
        let rolling = json!({
            "metadata": {"generation": 3},
            "spec": {"replicas": 2},
            "status": {"observedGeneration": 3, "readyReplicas": 1}
        });
        assert_eq!(workload_state(&rolling), ReadinessState::Pending);

        let ready = json!({
            "metadata": {"generation": 3},
            "spec": {"replicas": 2},
            "status": {"observedGeneration": 3, "readyReplicas": 2}
        });
        assert_eq!(workload_state(&ready), ReadinessState::Ready);

        let stale = json!({
            "metadata": {"generation": 4},
            "spec": {"replicas": 2},
            "status": {"observedGeneration": 3, "readyReplicas": 2}
        });
        assert_eq!(workload_state(&stale), ReadinessState::Pending);
    }

    #[test]
    fn workload_failed_past_progress_deadline() {
        let stuck = json!({
            "spec": {"replicas": 1},
            "status": {"conditions": [
                {"type": "Available", "status": "False"},
                {"type": "Progressing", "status": "False", "reason": "ProgressDeadlineExceeded"}
            ]}
        });
        assert_eq!(workload_state(&stuck), ReadinessState::Failed);
    }

    #[test]
    fn pods_report_crash_loops_and_readiness() {
        assert_eq!(pods_state(&json!({"items": []})), ReadinessState::Absent);

        let crashing = json!({"items": [{
            "status": {"phase": "Running", "containerStatuses": [
                {"ready": false, "state": {"waiting": {"reason": "CrashLoopBackOff"}}}
            ]}
        }]});
        assert_eq!(pods_state(&crashing), ReadinessState::Failed);

        let starting = json!({"items": [{
            "status": {"phase": "Pending", "containerStatuses": [
                {"ready": false, "state": {"waiting": {"reason": "ContainerCreating"}}}
            ]}
        }]});
        assert_eq!(pods_state(&starting), ReadinessState::Pending);

        let running = json!({"items": [
            {"status": {"phase": "Pending"}},
            {"status": {"phase": "Running", "containerStatuses": [{"ready": true}, {"ready": true}]}}
        ]});
        assert_eq!(pods_state(&running), ReadinessState::Ready);
    }

    #[tokio::test]
    async fn probe_maps_not_found_to_absent() {
        let tools = Arc::new(ScriptedTools::new());
        tools.fail(
            "kubectl --context kind-dota2-ml get namespace data -o json",
            1,
            "Error from server (NotFound): namespaces \"data\" not found",
        );
        tools.succeed(
            "kubectl --context kind-dota2-ml get secret mongodb-secret -n data -o json",
            r#"{"kind": "Secret"}"#,
        );
        let probe = KubectlProbe::new(tools.clone(), "kind-dota2-ml", Duration::from_secs(5));

        assert_eq!(probe.check(&ResourceRef::namespace("data")).await, Ok(ReadinessState::Absent));
        assert_eq!(
            probe.check(&ResourceRef::secret("mongodb-secret", "data")).await,
            Ok(ReadinessState::Ready)
        );
        assert_eq!(probe.check(&ResourceRef::release("redis", "data")).await, Ok(ReadinessState::Absent));
    }
}
