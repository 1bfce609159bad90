//! kind cluster probe: listed by `kind get clusters`, reachable through `kubectl cluster-info`.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use stagehand_types::{ReadinessState, ResourceKind, ResourceRef};
use stagehand_util::config::ClusterSettings;
use tracing::debug;

use super::{Probe, ProbeError, is_connection_refused};
use crate::tools::{Invocation, ToolRunner};

pub struct ClusterProbe {
    tools: Arc<dyn ToolRunner>,
    settings: ClusterSettings,
    timeout: Duration,
}

impl ClusterProbe {
    pub fn new(tools: Arc<dyn ToolRunner>, settings: ClusterSettings, timeout: Duration) -> Self {
        Self { tools, settings, timeout }
    }

    fn context_for(&self, cluster: &str) -> String {
        if cluster == self.settings.name {
            self.settings.context()
        } else {
            format!("kind-{cluster}")
        }
    }
}

#[async_trait]
impl Probe for ClusterProbe {
    fn name(&self) -> &str {
        "cluster"
    }

    async fn check(&self, resource: &ResourceRef) -> Result<ReadinessState, ProbeError> {
        if resource.kind != ResourceKind::Cluster {
            return Ok(ReadinessState::Absent);
        }

        let listing = self
            .tools
            .run(&Invocation::new("kind", ["get", "clusters"]).with_timeout(self.timeout))
            .await?;
        if !listing.success() {
            return Err(ProbeError::Transient(listing.message()));
        }
        if !cluster_listed(&listing.stdout, &resource.name) {
            return Ok(ReadinessState::Absent);
        }

        let context = self.context_for(&resource.name);
        let info = self
            .tools
            .run(&Invocation::new("kubectl", ["cluster-info", "--context", context.as_str()]).with_timeout(self.timeout))
            .await?;
        if info.success() {
            return Ok(ReadinessState::Ready);
        }
        debug!(cluster = %resource.name, stderr = %info.message(), "cluster API not answering");
        if is_connection_refused(&info.stderr) {
            Ok(ReadinessState::Pending)
        } else {
            Err(ProbeError::Transient(info.message()))
        }
    }
}

/// Whether `kind get clusters` output names the cluster.
pub fn cluster_listed(listing: &str, cluster: &str) -> bool {
    listing.lines().any(|line| line.trim() == cluster)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTools;

    fn probe(tools: Arc<ScriptedTools>) -> ClusterProbe {
        ClusterProbe::new(tools, ClusterSettings::default(), Duration::from_secs(5))
    }

    #[test]
    fn matches_whole_cluster_names() {
        assert!(cluster_listed("kind\ndota2-ml\n", "dota2-ml"));
        assert!(!cluster_listed("dota2-ml-old\n", "dota2-ml"));
        assert!(!cluster_listed("", "dota2-ml"));
    }

    #[tokio::test]
    async fn unlisted_cluster_is_absent() {
        let tools = Arc::new(ScriptedTools::new());
        tools.succeed("kind get clusters", "other\n");
        assert_eq!(
            probe(tools.clone()).check(&ResourceRef::cluster("dota2-ml")).await,
            Ok(ReadinessState::Absent)
        );
        assert_eq!(tools.calls(), vec!["kind get clusters".to_string()]);
    }

    #[tokio::test]
    async fn refused_connection_is_pending() {
        let tools = Arc::new(ScriptedTools::new());
        tools.succeed("kind get clusters", "dota2-ml\n");
        tools.fail(
            "kubectl cluster-info --context kind-dota2-ml",
            1,
            "The connection to the server 127.0.0.1:6443 was refused - did you specify the right host or port?",
        );
        assert_eq!(
            probe(tools).check(&ResourceRef::cluster("dota2-ml")).await,
            Ok(ReadinessState::Pending)
        );
    }

    #[tokio::test]
    async fn missing_kind_binary_is_unavailable() {
        let tools = Arc::new(ScriptedTools::new());
        tools.not_installed("kind");
        let error = probe(tools)
            .check(&ResourceRef::cluster("dota2-ml"))
            .await
            .expect_err("kind is missing");
        assert!(error.is_unavailable());
    }
}
