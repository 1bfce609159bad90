//! References to external objects that probes inspect and steps act upon.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Category of an external object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// A local kind cluster and its API server.
    Cluster,
    Namespace,
    Secret,
    Deployment,
    #[serde(rename = "statefulset")]
    StatefulSet,
    /// Pods matched by a label selector; the resource name holds the selector.
    Pods,
    /// A Helm release.
    Release,
    /// An ArgoCD application resource.
    Application,
    /// An HTTP endpoint; the resource name holds the URL.
    Endpoint,
    /// A custom resource definition.
    Crd,
    /// A local binary that must be installed.
    Tool,
}

impl ResourceKind {
    /// Every kind in declaration order.
    pub const ALL: [ResourceKind; 11] = [
        ResourceKind::Cluster,
        ResourceKind::Namespace,
        ResourceKind::Secret,
        ResourceKind::Deployment,
        ResourceKind::StatefulSet,
        ResourceKind::Pods,
        ResourceKind::Release,
        ResourceKind::Application,
        ResourceKind::Endpoint,
        ResourceKind::Crd,
        ResourceKind::Tool,
    ];

    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Cluster => "cluster",
            ResourceKind::Namespace => "namespace",
            ResourceKind::Secret => "secret",
            ResourceKind::Deployment => "deployment",
            ResourceKind::StatefulSet => "statefulset",
            ResourceKind::Pods => "pods",
            ResourceKind::Release => "release",
            ResourceKind::Application => "application",
            ResourceKind::Endpoint => "endpoint",
            ResourceKind::Crd => "crd",
            ResourceKind::Tool => "tool",
        }
    }

    /// Whether objects of this kind live inside a Kubernetes namespace.
    pub fn is_namespaced(&self) -> bool {
        matches!(
            self,
            ResourceKind::Secret
                | ResourceKind::Deployment
                | ResourceKind::StatefulSet
                | ResourceKind::Pods
                | ResourceKind::Release
                | ResourceKind::Application
        )
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a resource kind name is not recognized.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown resource kind '{0}'")]
pub struct UnknownResourceKind(pub String);

impl FromStr for ResourceKind {
    type Err = UnknownResourceKind;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        let kind = match normalized.as_str() {
            "cluster" | "clusters" => ResourceKind::Cluster,
            "namespace" | "namespaces" | "ns" => ResourceKind::Namespace,
            "secret" | "secrets" => ResourceKind::Secret,
            "deployment" | "deployments" | "deploy" => ResourceKind::Deployment,
            "statefulset" | "statefulsets" | "sts" => ResourceKind::StatefulSet,
            "pods" | "pod" => ResourceKind::Pods,
            "release" | "releases" | "helm" => ResourceKind::Release,
            "application" | "applications" | "app" => ResourceKind::Application,
            "endpoint" | "endpoints" | "http" => ResourceKind::Endpoint,
            "crd" | "crds" => ResourceKind::Crd,
            "tool" | "tools" => ResourceKind::Tool,
            _ => return Err(UnknownResourceKind(raw.trim().to_string())),
        };
        Ok(kind)
    }
}

/// Parse a comma separated kind list such as `namespace,release`.
///
/// Blank entries are ignored so `--keep=` yields an empty list.
pub fn parse_kind_list(raw: &str) -> Result<Vec<ResourceKind>, UnknownResourceKind> {
    let mut kinds = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
        let kind = entry.parse()?;
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    Ok(kinds)
}

/// Identifies one external object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ResourceRef {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            namespace: None,
        }
    }

    pub fn namespaced(kind: ResourceKind, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }

    pub fn cluster(name: impl Into<String>) -> Self {
        Self::new(ResourceKind::Cluster, name)
    }

    pub fn namespace(name: impl Into<String>) -> Self {
        Self::new(ResourceKind::Namespace, name)
    }

    pub fn secret(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::namespaced(ResourceKind::Secret, name, namespace)
    }

    pub fn deployment(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::namespaced(ResourceKind::Deployment, name, namespace)
    }

    pub fn stateful_set(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::namespaced(ResourceKind::StatefulSet, name, namespace)
    }

    /// Pods matching `selector` (for example `app=mongodb`).
    pub fn pods(selector: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::namespaced(ResourceKind::Pods, selector, namespace)
    }

    pub fn release(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::namespaced(ResourceKind::Release, name, namespace)
    }

    pub fn application(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::namespaced(ResourceKind::Application, name, namespace)
    }

    pub fn endpoint(url: impl Into<String>) -> Self {
        Self::new(ResourceKind::Endpoint, url)
    }

    pub fn crd(name: impl Into<String>) -> Self {
        Self::new(ResourceKind::Crd, name)
    }

    pub fn tool(binary: impl Into<String>) -> Self {
        Self::new(ResourceKind::Tool, binary)
    }

    /// Namespace, or `default` for namespaced kinds declared without one.
    pub fn namespace_or_default(&self) -> &str {
        self.namespace.as_deref().unwrap_or("default")
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{}/{}/{}", self.kind, namespace, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}
