//! Readiness probes.
//!
//! A probe answers one question about one external resource: does it exist, and is it ready?
//! Probes never mutate anything. Errors mean the question could not be asked at all; a resource
//! that is missing or broken is an ordinary [`ReadinessState`].

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use stagehand_types::{ReadinessState, ResourceKind, ResourceRef};
use stagehand_util::config::StagehandConfig;
use thiserror::Error;

use crate::tools::{ToolError, ToolRunner};

mod argocd;
mod cluster;
mod helm;
mod http;
mod kubectl;
mod tool;

pub use argocd::{ApplicationProbe, application_state};
pub use cluster::{ClusterProbe, cluster_listed};
pub use helm::{HelmReleaseProbe, release_state};
pub use http::{HttpProbe, status_accepted};
pub use kubectl::{KubectlProbe, namespace_state, pods_state, workload_state};
pub use tool::{ToolProbe, find_on_path};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    /// The probing tool or API cannot be used at all.
    #[error("probe unavailable: {0}")]
    Unavailable(String),

    /// The probe ran but produced no usable answer this time.
    #[error("probe inconclusive: {0}")]
    Transient(String),

    #[error("probe timed out after {0:?}")]
    TimedOut(Duration),
}

impl ProbeError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ProbeError::Unavailable(_))
    }
}

impl From<ToolError> for ProbeError {
    fn from(error: ToolError) -> Self {
        match error {
            ToolError::NotInstalled { .. } | ToolError::Spawn { .. } => ProbeError::Unavailable(error.to_string()),
            ToolError::TimedOut { after, .. } => ProbeError::TimedOut(after),
        }
    }
}

/// Non-mutating readiness check against an external system.
#[async_trait]
pub trait Probe: Send + Sync {
    fn name(&self) -> &str;

    /// Observe the resource. Kinds the probe does not understand report `Absent`.
    async fn check(&self, resource: &ResourceRef) -> Result<ReadinessState, ProbeError>;
}

/// Classify a failed kubectl/helm call from its stderr.
pub(crate) fn classify_failure(stderr: &str) -> Result<ReadinessState, ProbeError> {
    let lowered = stderr.to_ascii_lowercase();
    if lowered.contains("notfound")
        || lowered.contains("not found")
        || lowered.contains("doesn't have a resource type")
        || lowered.contains("no matches for kind")
    {
        return Ok(ReadinessState::Absent);
    }
    Err(ProbeError::Transient(stagehand_util::redact_sensitive(stderr.trim())))
}

/// Whether tool output describes an API server that refused or dropped the connection.
pub(crate) fn is_connection_refused(stderr: &str) -> bool {
    let lowered = stderr.to_ascii_lowercase();
    lowered.contains("connection refused")
        || lowered.contains("was refused")
        || lowered.contains("unable to connect to the server")
        || lowered.contains("couldn't get current server api group list")
}

/// The probe that handles each resource kind, built once per run.
#[derive(Clone)]
pub struct ProbeSet {
    kubectl: Arc<KubectlProbe>,
    helm: Arc<HelmReleaseProbe>,
    application: Arc<ApplicationProbe>,
    cluster: Arc<ClusterProbe>,
    http: Arc<HttpProbe>,
    tool: Arc<ToolProbe>,
}

impl ProbeSet {
    pub fn new(tools: Arc<dyn ToolRunner>, config: &StagehandConfig) -> anyhow::Result<Self> {
        let timeout = config.timeouts.probe;
        let context = config.cluster.context();
        Ok(Self {
            kubectl: Arc::new(KubectlProbe::new(tools.clone(), context.clone(), timeout)),
            helm: Arc::new(HelmReleaseProbe::new(tools.clone(), context.clone(), timeout)),
            application: Arc::new(ApplicationProbe::new(tools.clone(), context, timeout)),
            cluster: Arc::new(ClusterProbe::new(tools, config.cluster.clone(), timeout)),
            http: Arc::new(HttpProbe::new(timeout)?),
            tool: Arc::new(ToolProbe::new(config.tools.clone())),
        })
    }

    pub fn for_kind(&self, kind: ResourceKind) -> Arc<dyn Probe> {
        match kind {
            ResourceKind::Cluster => self.cluster.clone(),
            ResourceKind::Namespace
            | ResourceKind::Secret
            | ResourceKind::Deployment
            | ResourceKind::StatefulSet
            | ResourceKind::Pods
            | ResourceKind::Crd => self.kubectl.clone(),
            ResourceKind::Release => self.helm.clone(),
            ResourceKind::Application => self.application.clone(),
            ResourceKind::Endpoint => self.http.clone(),
            ResourceKind::Tool => self.tool.clone(),
        }
    }

    /// Endpoint probe accepting only the given status codes; empty keeps the 200-399 default.
    pub fn endpoint_accepting(&self, accept_status: &[u16]) -> Arc<dyn Probe> {
        if accept_status.is_empty() {
            return self.http.clone();
        }
        Arc::new(self.http.accepting(accept_status.to_vec()))
    }
}

impl std::fmt::Debug for ProbeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeSet").finish_non_exhaustive()
    }
}
