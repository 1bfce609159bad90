//! Data models for Stagehand configuration.

use std::{env, fmt, path::PathBuf, time::Duration};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use stagehand_types::{FailureDecision, RetryPolicy, duration};
use thiserror::Error;

use super::{InterpolationError, ValidationError};

/// Prefix of environment variables that override configured credentials.
pub const CREDENTIAL_ENV_PREFIX: &str = "STAGEHAND_";

/// Root configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StagehandConfig {
    pub cluster: ClusterSettings,
    pub tools: ToolPaths,
    pub timeouts: Timeouts,
    /// Postcondition polling policy for steps that do not declare their own.
    pub retry: RetryPolicy,
    /// How `prompt` failure policies resolve when nobody can be asked.
    pub prompt_default: FailureDecision,
    pub charts: ChartSettings,
    pub endpoints: EndpointSettings,
    pub gitops: GitopsSettings,
    pub credentials: Credentials,
}

impl Default for StagehandConfig {
    fn default() -> Self {
        Self {
            cluster: ClusterSettings::default(),
            tools: ToolPaths::default(),
            timeouts: Timeouts::default(),
            retry: RetryPolicy::default(),
            prompt_default: FailureDecision::Abort,
            charts: ChartSettings::default(),
            endpoints: EndpointSettings::default(),
            gitops: GitopsSettings::default(),
            credentials: Credentials::default(),
        }
    }
}

/// Local kind cluster the platform runs on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterSettings {
    pub name: String,
    /// kubectl context; defaults to `kind-<name>`.
    pub kube_context: Option<String>,
    /// Optional kind cluster configuration passed to `kind create cluster --config`.
    pub kind_config: Option<PathBuf>,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            name: "dota2-ml".to_string(),
            kube_context: None,
            kind_config: None,
        }
    }
}

impl ClusterSettings {
    pub fn context(&self) -> String {
        self.kube_context.clone().unwrap_or_else(|| format!("kind-{}", self.name))
    }
}

/// Binary used for each external tool. Plain names are looked up on `PATH`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolPaths {
    pub kubectl: String,
    pub helm: String,
    pub kind: String,
    pub argocd: String,
    pub docker: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            kubectl: "kubectl".to_string(),
            helm: "helm".to_string(),
            kind: "kind".to_string(),
            argocd: "argocd".to_string(),
            docker: "docker".to_string(),
        }
    }
}

impl ToolPaths {
    /// Configured binary for a tool name; unknown tools resolve to themselves.
    pub fn resolve<'a>(&'a self, tool: &'a str) -> &'a str {
        match tool {
            "kubectl" => &self.kubectl,
            "helm" => &self.helm,
            "kind" => &self.kind,
            "argocd" => &self.argocd,
            "docker" => &self.docker,
            other => other,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("kubectl", self.kubectl.as_str()),
            ("helm", self.helm.as_str()),
            ("kind", self.kind.as_str()),
            ("argocd", self.argocd.as_str()),
            ("docker", self.docker.as_str()),
        ]
        .into_iter()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Timeouts {
    /// Ceiling for a single probe call.
    #[serde(with = "duration::text")]
    pub probe: Duration,
    /// Ceiling for a single tool invocation made by an action.
    #[serde(with = "duration::text")]
    pub tool: Duration,
    /// Ceiling for a whole plan; unlimited when absent.
    #[serde(with = "duration::text_option", skip_serializing_if = "Option::is_none")]
    pub plan: Option<Duration>,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            probe: Duration::from_secs(5),
            tool: Duration::from_secs(120),
            plan: None,
        }
    }
}

/// Chart references and values files used by the built-in plans.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChartSettings {
    /// Directory holding `values-<environment>.yaml`.
    pub values_dir: PathBuf,
    pub app: String,
    pub mongodb: String,
    pub redis: String,
    pub jenkins: String,
    pub metrics_server_manifest: String,
}

impl Default for ChartSettings {
    fn default() -> Self {
        Self {
            values_dir: PathBuf::from("helm"),
            app: "./helm/dota2-predictor".to_string(),
            mongodb: "bitnami/mongodb".to_string(),
            redis: "bitnami/redis".to_string(),
            jenkins: "jenkins/jenkins".to_string(),
            metrics_server_manifest: "https://github.com/kubernetes-sigs/metrics-server/releases/latest/download/components.yaml"
                .to_string(),
        }
    }
}

impl ChartSettings {
    /// Values file for an environment, e.g. `helm/values-staging.yaml`.
    pub fn values_file(&self, environment: &str) -> PathBuf {
        self.values_dir.join(format!("values-{environment}.yaml"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EndpointSettings {
    pub api_health: String,
    pub jenkins: String,
    pub argocd: String,
    /// Local port the prediction API is forwarded to.
    pub api_local_port: u16,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            api_health: "http://localhost:8080/health".to_string(),
            jenkins: "http://localhost:8081/login".to_string(),
            argocd: "https://localhost:8443".to_string(),
            api_local_port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GitopsSettings {
    pub install_manifest: String,
    /// ArgoCD application that deploys the prediction API.
    pub application: String,
    pub repo_url: Option<String>,
    pub path: String,
}

impl Default for GitopsSettings {
    fn default() -> Self {
        Self {
            install_manifest: "https://raw.githubusercontent.com/argoproj/argo-cd/stable/manifests/install.yaml".to_string(),
            application: "dota2-predictor".to_string(),
            repo_url: None,
            path: "helm/dota2-predictor".to_string(),
        }
    }
}

/// Named secrets such as `mongodb_password` or `registry_token`.
///
/// A value from `STAGEHAND_<NAME>` in the environment takes precedence over the file. Debug
/// output never shows values.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(IndexMap<String, String>);

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.0.shift_remove(name)
    }

    /// Value for a credential, consulting the environment override first. Empty values count as unset.
    pub fn get(&self, name: &str) -> Option<String> {
        let from_env = env::var(Self::env_key(name)).ok().filter(|value| !value.trim().is_empty());
        from_env.or_else(|| self.0.get(name).filter(|value| !value.trim().is_empty()).cloned())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Names from `required` that have no value.
    pub fn missing<'a>(&self, required: impl IntoIterator<Item = &'a String>) -> Vec<String> {
        required.into_iter().filter(|name| !self.contains(name)).cloned().collect()
    }

    /// Environment variable consulted for a credential: `mongodb_password` → `STAGEHAND_MONGODB_PASSWORD`.
    pub fn env_key(name: &str) -> String {
        format!("{CREDENTIAL_ENV_PREFIX}{}", name.to_ascii_uppercase().replace(['-', '.'], "_"))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub(crate) fn values_mut(&mut self) -> impl Iterator<Item = (&String, &mut String)> {
        self.0.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.0.keys().map(|name| (name, "<redacted>"))).finish()
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error(transparent)]
    Interpolation(#[from] InterpolationError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_local_platform() {
        let config = StagehandConfig::default();
        assert_eq!(config.cluster.context(), "kind-dota2-ml");
        assert_eq!(config.timeouts.probe, Duration::from_secs(5));
        assert_eq!(config.prompt_default, FailureDecision::Abort);
        assert_eq!(config.charts.values_file("production"), PathBuf::from("helm/values-production.yaml"));
        assert_eq!(config.tools.resolve("helm"), "helm");
        assert_eq!(config.tools.resolve("curl"), "curl");
    }

    #[test]
    fn credential_debug_output_hides_values() {
        let mut credentials = Credentials::new();
        credentials.insert("mongodb_password", "hunter2");
        let rendered = format!("{credentials:?}");
        assert!(rendered.contains("mongodb_password"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn environment_overrides_file_credentials() {
        let mut credentials = Credentials::new();
        credentials.insert("registry_token", "from-file");
        credentials.insert("webhook_url", "");

        temp_env::with_vars(
            [
                ("STAGEHAND_REGISTRY_TOKEN", Some("from-env")),
                ("STAGEHAND_MONGODB_USERNAME", Some("admin")),
                ("STAGEHAND_WEBHOOK_URL", None),
            ],
            || {
                assert_eq!(credentials.get("registry_token").as_deref(), Some("from-env"));
                assert_eq!(credentials.get("mongodb_username").as_deref(), Some("admin"));
                let required = vec!["mongodb_username".to_string(), "webhook_url".to_string()];
                assert_eq!(credentials.missing(&required), vec!["webhook_url".to_string()]);
            },
        );
    }
}
