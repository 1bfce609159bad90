//! Built-in provisioning, teardown, and status plans for the ML platform.

use std::{sync::Arc, time::Duration};

use once_cell::sync::Lazy;
use stagehand_types::{Environment, OnFailure, PlanKind, ResourceKind, ResourceRef, RetryPolicy};
use stagehand_util::config::StagehandConfig;
use thiserror::Error;

use crate::{
    actions::{Action, ApplyManifest, PortForward, RunCommand, Sequence, StripFinalizers},
    check::Check,
    plan::{Plan, PlanError},
    probe::ProbeSet,
    step::Step,
};

const CONNECTIVITY: &str = "cluster-connectivity";
const HELM_REPOSITORIES: &str = "helm-repositories";

const DATA_NAMESPACE: &str = "data";
const CI_NAMESPACE: &str = "jenkins";
const GITOPS_NAMESPACE: &str = "argocd";
const APP_NAMESPACE: &str = "ml-pipeline";
const APP_RELEASE: &str = "dota2-predictor";

const ROLLOUT_BUDGET: Duration = Duration::from_secs(600);
const NAMESPACE_BUDGET: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("unknown {kind} plan '{name}'; available: {}", available.join(", "))]
    UnknownPlan {
        kind: &'static str,
        name: String,
        available: Vec<&'static str>,
    },

    #[error("endpoint '{url}' has no usable port")]
    EndpointPort { url: String },

    #[error(transparent)]
    Plan(#[from] PlanError),
}

/// Name, goal, and summary of a built-in plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogEntry {
    pub name: &'static str,
    pub kind: PlanKind,
    pub description: &'static str,
}

const ENTRIES: &[CatalogEntry] = &[
    CatalogEntry {
        name: "cluster",
        kind: PlanKind::Provision,
        description: "kind cluster with metrics-server",
    },
    CatalogEntry {
        name: "data-plane",
        kind: PlanKind::Provision,
        description: "MongoDB and Redis in the data namespace",
    },
    CatalogEntry {
        name: "ci",
        kind: PlanKind::Provision,
        description: "Jenkins controller",
    },
    CatalogEntry {
        name: "gitops",
        kind: PlanKind::Provision,
        description: "ArgoCD and the prediction API application",
    },
    CatalogEntry {
        name: "ml-pipeline",
        kind: PlanKind::Provision,
        description: "prediction API release with a health check",
    },
    CatalogEntry {
        name: "all",
        kind: PlanKind::Provision,
        description: "every provisioning plan in order",
    },
    CatalogEntry {
        name: "all",
        kind: PlanKind::Teardown,
        description: "releases, namespaces, metrics-server, then the cluster",
    },
    CatalogEntry {
        name: "apps",
        kind: PlanKind::Teardown,
        description: "releases and application namespaces; keeps ArgoCD and the cluster",
    },
    CatalogEntry {
        name: "status",
        kind: PlanKind::Status,
        description: "read-only readiness report",
    },
];

/// Every built-in plan.
pub fn list() -> &'static [CatalogEntry] {
    ENTRIES
}

fn names(kind: PlanKind) -> Vec<&'static str> {
    ENTRIES.iter().filter(|entry| entry.kind == kind).map(|entry| entry.name).collect()
}

/// Builds catalog plans for one configuration and environment.
pub struct Catalog<'a> {
    probes: &'a ProbeSet,
    config: &'a StagehandConfig,
    environment: Environment,
}

impl<'a> Catalog<'a> {
    pub fn new(probes: &'a ProbeSet, config: &'a StagehandConfig, environment: Environment) -> Self {
        Self {
            probes,
            config,
            environment,
        }
    }

    pub fn provision(&self, name: &str) -> Result<Plan, CatalogError> {
        let builder = Plan::builder(name).kind(PlanKind::Provision);
        let plan = match name {
            "cluster" => builder.describe("kind cluster with metrics-server").steps(self.cluster_steps()),
            "data-plane" => builder
                .describe("MongoDB and Redis in the data namespace")
                .require_credentials(["mongodb_username", "mongodb_password"])
                .step(self.connectivity())
                .step(self.helm_repositories())
                .steps(self.data_plane_steps()),
            "ci" => builder
                .describe("Jenkins controller")
                .step(self.connectivity())
                .step(self.helm_repositories())
                .steps(self.ci_steps()?),
            "gitops" => builder
                .describe("ArgoCD and the prediction API application")
                .step(self.connectivity())
                .steps(self.gitops_steps()?),
            "ml-pipeline" => builder
                .describe("prediction API release with a health check")
                .step(self.connectivity())
                .steps(self.ml_pipeline_steps()?),
            "all" => builder
                .describe("every provisioning plan in order")
                .require_credentials(["mongodb_username", "mongodb_password"])
                .steps(self.cluster_steps())
                .step(self.helm_repositories())
                .steps(self.data_plane_steps())
                .steps(self.ci_steps()?)
                .steps(self.gitops_steps()?)
                .steps(self.ml_pipeline_steps()?),
            other => {
                return Err(CatalogError::UnknownPlan {
                    kind: "provision",
                    name: other.to_string(),
                    available: names(PlanKind::Provision),
                });
            }
        };
        Ok(plan.build()?)
    }

    pub fn teardown(&self, name: &str) -> Result<Plan, CatalogError> {
        let builder = Plan::builder(name).kind(PlanKind::Teardown);
        let plan = match name {
            "all" => builder
                .describe("releases, namespaces, metrics-server, then the cluster")
                .steps(self.uninstall_steps())
                .steps(self.namespace_deletions(&[APP_NAMESPACE, CI_NAMESPACE, DATA_NAMESPACE, GITOPS_NAMESPACE]))
                .step(self.remove_metrics_server())
                .step(self.delete_cluster()),
            "apps" => builder
                .describe("releases and application namespaces; keeps ArgoCD and the cluster")
                .steps(self.uninstall_steps())
                .steps(self.namespace_deletions(&[APP_NAMESPACE, CI_NAMESPACE, DATA_NAMESPACE])),
            other => {
                return Err(CatalogError::UnknownPlan {
                    kind: "teardown",
                    name: other.to_string(),
                    available: names(PlanKind::Teardown),
                });
            }
        };
        Ok(plan.build()?)
    }

    /// Read-only plan: every check runs once and reports without aborting.
    pub fn status(&self) -> Result<Plan, CatalogError> {
        let config = self.config;
        let mut checks: Vec<(String, ResourceRef)> = config
            .tools
            .iter()
            .map(|(tool, binary)| (format!("tool-{tool}"), ResourceRef::tool(binary)))
            .collect();
        checks.push(("cluster".into(), ResourceRef::cluster(&config.cluster.name)));
        for namespace in [DATA_NAMESPACE, CI_NAMESPACE, GITOPS_NAMESPACE, APP_NAMESPACE] {
            checks.push((format!("namespace-{namespace}"), ResourceRef::namespace(namespace)));
        }
        checks.push(("mongodb".into(), ResourceRef::release("mongodb", DATA_NAMESPACE)));
        checks.push(("redis".into(), ResourceRef::release("redis", DATA_NAMESPACE)));
        checks.push(("jenkins".into(), ResourceRef::release("jenkins", CI_NAMESPACE)));
        checks.push((APP_RELEASE.into(), ResourceRef::release(APP_RELEASE, APP_NAMESPACE)));
        checks.push((
            "application".into(),
            ResourceRef::application(&config.gitops.application, GITOPS_NAMESPACE),
        ));
        checks.push(("api-health".into(), ResourceRef::endpoint(&config.endpoints.api_health)));

        let steps = checks.into_iter().map(|(name, resource)| {
            let group = if resource.kind == ResourceKind::Tool {
                "tools"
            } else {
                "resources"
            };
            Step::new(name, self.present(resource))
                .retry(RetryPolicy::once())
                .on_failure(OnFailure::Continue)
                .group(group)
        });

        Ok(Plan::builder("status")
            .kind(PlanKind::Status)
            .describe("read-only readiness report")
            .steps(steps)
            .build()?)
    }

    fn present(&self, resource: ResourceRef) -> Check {
        Check::present(self.probes.for_kind(resource.kind), resource)
    }

    fn gone(&self, resource: ResourceRef) -> Check {
        Check::gone(self.probes.for_kind(resource.kind), resource)
    }

    /// Create-if-absent step: skipped when `resource` already exists and is ready.
    fn converge(&self, name: &str, resource: ResourceRef, action: Arc<dyn Action>) -> Step {
        Step::new(name, self.present(resource.clone()))
            .precondition(self.present(resource))
            .action(action)
    }

    /// Delete-if-present step: skipped when `resource` is already gone.
    fn remove(&self, name: &str, resource: ResourceRef, action: Arc<dyn Action>) -> Step {
        Step::new(name, self.gone(resource.clone()))
            .precondition(self.gone(resource))
            .action(action)
    }

    fn kubectl(&self, args: &[&str]) -> Arc<dyn Action> {
        let argv = ["kubectl", "--context", "${{ kube_context }}"].into_iter().chain(args.iter().copied());
        Arc::new(RunCommand::from_argv(argv))
    }

    fn helm(&self, args: &[&str]) -> Arc<dyn Action> {
        let argv = ["helm"]
            .into_iter()
            .chain(args.iter().copied())
            .chain(["--kube-context", "${{ kube_context }}"]);
        Arc::new(RunCommand::from_argv(argv))
    }

    fn create_namespace(&self, namespace: &str) -> Step {
        self.converge(
            &format!("namespace-{namespace}"),
            ResourceRef::namespace(namespace),
            self.kubectl(&["create", "namespace", namespace]),
        )
        .depends_on([CONNECTIVITY])
    }

    fn connectivity(&self) -> Step {
        Step::new(CONNECTIVITY, self.present(ResourceRef::cluster(&self.config.cluster.name)))
            .describe("kubernetes API reachable")
            .retry(RetryPolicy::fixed(5, Duration::from_secs(2)))
    }

    fn helm_repositories(&self) -> Step {
        let action = Sequence::new(vec![
            Arc::new(RunCommand::from_argv([
                "helm",
                "repo",
                "add",
                "bitnami",
                "https://charts.bitnami.com/bitnami",
                "--force-update",
            ])),
            Arc::new(RunCommand::from_argv([
                "helm",
                "repo",
                "add",
                "jenkins",
                "https://charts.jenkins.io",
                "--force-update",
            ])),
            Arc::new(RunCommand::from_argv(["helm", "repo", "update"])),
        ]);
        Step::new(HELM_REPOSITORIES, self.present(ResourceRef::tool(&self.config.tools.helm)))
            .describe("chart repositories registered")
            .action(Arc::new(action))
            .retry(RetryPolicy::once())
    }

    fn cluster_steps(&self) -> Vec<Step> {
        let config = self.config;
        let mut steps: Vec<Step> = [
            ("kind", &config.tools.kind),
            ("kubectl", &config.tools.kubectl),
            ("helm", &config.tools.helm),
            ("docker", &config.tools.docker),
        ]
        .into_iter()
        .map(|(tool, binary)| {
            Step::new(format!("tool-{tool}"), self.present(ResourceRef::tool(binary)))
                .retry(RetryPolicy::once())
                .group("prerequisites")
        })
        .collect();
        let tool_steps: Vec<String> = steps.iter().map(|step| step.name().to_string()).collect();

        let mut create = vec![
            "kind".to_string(),
            "create".to_string(),
            "cluster".to_string(),
            "--name".to_string(),
            "${{ cluster }}".to_string(),
        ];
        if let Some(kind_config) = &config.cluster.kind_config {
            create.push("--config".to_string());
            create.push(kind_config.display().to_string());
        }
        let cluster = ResourceRef::cluster(&config.cluster.name);
        steps.push(
            self.converge("create-cluster", cluster, Arc::new(RunCommand::from_argv(create)))
                .depends_on(tool_steps)
                .budget(Duration::from_secs(600)),
        );
        steps.push(self.connectivity().depends_on(["create-cluster"]));

        let manifest = config.charts.metrics_server_manifest.as_str();
        let patch = r#"[{"op":"add","path":"/spec/template/spec/containers/0/args/-","value":"--kubelet-insecure-tls"}]"#;
        let install = Sequence::new(vec![
            self.kubectl(&["apply", "-f", manifest]),
            self.kubectl(&["patch", "deployment", "metrics-server", "-n", "kube-system", "--type=json", "-p", patch]),
        ]);
        steps.push(
            self.converge(
                "metrics-server",
                ResourceRef::deployment("metrics-server", "kube-system"),
                Arc::new(install),
            )
            .depends_on([CONNECTIVITY])
            .on_failure(OnFailure::Continue)
            .budget(Duration::from_secs(300)),
        );
        steps
    }

    fn data_plane_steps(&self) -> Vec<Step> {
        let charts = &self.config.charts;
        let secret = self.converge(
            "mongodb-secret",
            ResourceRef::secret("mongodb-secret", DATA_NAMESPACE),
            self.kubectl(&[
                "create",
                "secret",
                "generic",
                "mongodb-secret",
                "-n",
                DATA_NAMESPACE,
                "--from-literal=mongodb-root-password=${{ credentials.mongodb_password }}",
                "--from-literal=mongodb-passwords=${{ credentials.mongodb_password }}",
                "--from-literal=mongodb-username=${{ credentials.mongodb_username }}",
            ]),
        );
        let mongodb = self.converge(
            "mongodb-release",
            ResourceRef::release("mongodb", DATA_NAMESPACE),
            self.helm(&[
                "upgrade",
                "--install",
                "mongodb",
                &charts.mongodb,
                "-n",
                DATA_NAMESPACE,
                "--set",
                "auth.existingSecret=mongodb-secret",
                "--set",
                "auth.usernames[0]=${{ credentials.mongodb_username }}",
                "--set",
                "auth.databases[0]=dota2",
                "--set",
                "replicaCount=${{ replicas }}",
            ]),
        );
        let redis = self.converge(
            "redis-release",
            ResourceRef::release("redis", DATA_NAMESPACE),
            self.helm(&[
                "upgrade",
                "--install",
                "redis",
                &charts.redis,
                "-n",
                DATA_NAMESPACE,
                "--set",
                "auth.enabled=false",
                "--set",
                "replica.replicaCount=${{ replicas }}",
            ]),
        );

        vec![
            self.create_namespace(DATA_NAMESPACE),
            secret.depends_on([format!("namespace-{DATA_NAMESPACE}")]),
            mongodb.depends_on(["mongodb-secret", HELM_REPOSITORIES]),
            redis.depends_on([format!("namespace-{DATA_NAMESPACE}"), HELM_REPOSITORIES.to_string()]),
            Step::new("mongodb-rollout", self.present(ResourceRef::stateful_set("mongodb", DATA_NAMESPACE)))
                .depends_on(["mongodb-release"])
                .budget(ROLLOUT_BUDGET),
            Step::new("redis-rollout", self.present(ResourceRef::stateful_set("redis-master", DATA_NAMESPACE)))
                .depends_on(["redis-release"])
                .budget(ROLLOUT_BUDGET),
        ]
    }

    fn ci_steps(&self) -> Result<Vec<Step>, CatalogError> {
        let charts = &self.config.charts;
        let endpoint = &self.config.endpoints.jenkins;
        let release = self.converge(
            "jenkins-release",
            ResourceRef::release("jenkins", CI_NAMESPACE),
            self.helm(&[
                "upgrade",
                "--install",
                "jenkins",
                &charts.jenkins,
                "-n",
                CI_NAMESPACE,
                "--set",
                "controller.serviceType=ClusterIP",
            ]),
        );
        Ok(vec![
            self.create_namespace(CI_NAMESPACE),
            release.depends_on([format!("namespace-{CI_NAMESPACE}"), HELM_REPOSITORIES.to_string()]),
            Step::new("jenkins-rollout", self.present(ResourceRef::stateful_set("jenkins", CI_NAMESPACE)))
                .depends_on(["jenkins-release"])
                .budget(ROLLOUT_BUDGET),
            self.forward("jenkins-login", "svc/jenkins", CI_NAMESPACE, endpoint, 8080)?
                .depends_on(["jenkins-rollout"])
                .on_failure(OnFailure::Continue),
        ])
    }

    fn gitops_steps(&self) -> Result<Vec<Step>, CatalogError> {
        let gitops = &self.config.gitops;
        let install = Step::new(
            "argocd-install",
            self.present(ResourceRef::crd("applications.argoproj.io")),
        )
        .precondition(self.present(ResourceRef::deployment("argocd-server", GITOPS_NAMESPACE)))
        .action(self.kubectl(&["apply", "-n", GITOPS_NAMESPACE, "-f", &gitops.install_manifest]))
        .depends_on([format!("namespace-{GITOPS_NAMESPACE}")]);

        let application = self
            .converge(
                "argocd-application",
                ResourceRef::application(&gitops.application, GITOPS_NAMESPACE),
                Arc::new(ApplyManifest::new(
                    format!("application {}", gitops.application),
                    application_manifest(&gitops.application, &gitops.path, self.environment),
                )),
            )
            .depends_on(["argocd-server-rollout"])
            .budget(ROLLOUT_BUDGET);

        Ok(vec![
            self.create_namespace(GITOPS_NAMESPACE),
            install,
            Step::new(
                "argocd-server-rollout",
                self.present(ResourceRef::deployment("argocd-server", GITOPS_NAMESPACE)),
            )
            .depends_on(["argocd-install"])
            .budget(ROLLOUT_BUDGET),
            application,
            self.forward("argocd-ui", "svc/argocd-server", GITOPS_NAMESPACE, &self.config.endpoints.argocd, 443)?
                .depends_on(["argocd-server-rollout"])
                .on_failure(OnFailure::Continue),
        ])
    }

    fn ml_pipeline_steps(&self) -> Result<Vec<Step>, CatalogError> {
        let config = self.config;
        let values_file = config.charts.values_file(self.environment.as_str()).display().to_string();
        let release = self.converge(
            "app-release",
            ResourceRef::release(APP_RELEASE, APP_NAMESPACE),
            self.helm(&[
                "upgrade",
                "--install",
                APP_RELEASE,
                &config.charts.app,
                "-n",
                APP_NAMESPACE,
                "-f",
                &values_file,
                "--set",
                "replicaCount=${{ replicas }}",
            ]),
        );
        let health = Step::new(
            "api-health",
            Check::present(
                self.probes.endpoint_accepting(&[200]),
                ResourceRef::endpoint(&config.endpoints.api_health),
            ),
        )
        .describe("prediction API answers /health")
        .depends_on(["api-port-forward"])
        .retry(RetryPolicy::fixed(10, Duration::from_secs(3)))
        .on_failure(OnFailure::Prompt);

        Ok(vec![
            self.create_namespace(APP_NAMESPACE),
            release.depends_on([format!("namespace-{APP_NAMESPACE}")]),
            Step::new(
                "api-pods",
                self.present(ResourceRef::pods(format!("app.kubernetes.io/name={APP_RELEASE}"), APP_NAMESPACE)),
            )
            .depends_on(["app-release"])
            .budget(ROLLOUT_BUDGET),
            self.forward("api-port-forward", &format!("svc/{APP_RELEASE}"), APP_NAMESPACE, &config.endpoints.api_health, 80)?
                .depends_on(["api-pods"]),
            health,
        ])
    }

    /// Port-forward that is skipped when `url` already answers and succeeds once it does.
    fn forward(&self, name: &str, target: &str, namespace: &str, url: &str, remote_port: u16) -> Result<Step, CatalogError> {
        let local_port = reqwest::Url::parse(url)
            .ok()
            .and_then(|parsed| parsed.port_or_known_default())
            .ok_or_else(|| CatalogError::EndpointPort { url: url.to_string() })?;
        let listening = || {
            Check::present(
                self.probes.endpoint_accepting(&ANY_STATUS),
                ResourceRef::endpoint(url),
            )
        };
        Ok(Step::new(name, listening())
            .precondition(listening())
            .action(Arc::new(PortForward::new(target, namespace, local_port, remote_port)))
            .retry(RetryPolicy::fixed(10, Duration::from_secs(1))))
    }

    fn uninstall_steps(&self) -> Vec<Step> {
        let application = &self.config.gitops.application;
        let mut steps = vec![
            self.remove(
                "delete-application",
                ResourceRef::application(application, GITOPS_NAMESPACE),
                self.kubectl(&[
                    "delete",
                    "applications.argoproj.io",
                    application,
                    "-n",
                    GITOPS_NAMESPACE,
                    "--ignore-not-found",
                ]),
            )
            .on_failure(OnFailure::Continue),
        ];
        for (release, namespace) in [
            (APP_RELEASE, APP_NAMESPACE),
            ("jenkins", CI_NAMESPACE),
            ("redis", DATA_NAMESPACE),
            ("mongodb", DATA_NAMESPACE),
        ] {
            steps.push(
                self.remove(
                    &format!("uninstall-{release}"),
                    ResourceRef::release(release, namespace),
                    self.helm(&["uninstall", release, "-n", namespace]),
                )
                .on_failure(OnFailure::Continue),
            );
        }
        steps
    }

    fn namespace_deletions(&self, namespaces: &[&str]) -> Vec<Step> {
        namespaces
            .iter()
            .map(|&namespace| {
                let action = Sequence::new(vec![
                    self.kubectl(&["delete", "namespace", namespace, "--ignore-not-found", "--wait=false"]),
                    Arc::new(StripFinalizers::new(namespace).after(Duration::from_secs(60))),
                ]);
                self.remove(&format!("delete-namespace-{namespace}"), ResourceRef::namespace(namespace), Arc::new(action))
                    .group("namespaces")
                    .on_failure(OnFailure::Continue)
                    .retry(RetryPolicy::fixed(60, Duration::from_secs(2)))
                    .budget(NAMESPACE_BUDGET)
            })
            .collect()
    }

    fn remove_metrics_server(&self) -> Step {
        self.remove(
            "remove-metrics-server",
            ResourceRef::deployment("metrics-server", "kube-system"),
            self.kubectl(&["delete", "-f", &self.config.charts.metrics_server_manifest, "--ignore-not-found"]),
        )
        .on_failure(OnFailure::Continue)
    }

    fn delete_cluster(&self) -> Step {
        self.remove(
            "delete-cluster",
            ResourceRef::cluster(&self.config.cluster.name),
            Arc::new(RunCommand::from_argv(["kind", "delete", "cluster", "--name", "${{ cluster }}"])),
        )
        .budget(Duration::from_secs(300))
    }
}

/// Any HTTP answer at all means the forwarded port is listening.
static ANY_STATUS: Lazy<Vec<u16>> = Lazy::new(|| (100..=599).collect());

fn application_manifest(application: &str, path: &str, environment: Environment) -> String {
    format!(
        r#"apiVersion: argoproj.io/v1alpha1
kind: Application
metadata:
  name: {application}
  namespace: {GITOPS_NAMESPACE}
spec:
  project: default
  source:
    repoURL: ${{{{ config.gitops.repo_url }}}}
    targetRevision: HEAD
    path: {path}
    helm:
      valueFiles:
        - values-{environment}.yaml
  destination:
    server: https://kubernetes.default.svc
    namespace: {APP_NAMESPACE}
  syncPolicy:
    automated:
      prune: true
      selfHeal: true
    syncOptions:
      - CreateNamespace=true
"#
    )
}
