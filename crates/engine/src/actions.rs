//! Step actions: the mutating half of a step.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use serde_json::Value;
use stagehand_types::ActionDefinition;
use stagehand_util::{CommandLineError, redact_sensitive, split_command_line};
use tracing::{info, warn};

use crate::{
    context::RunContext,
    templates::resolve_templates,
    tools::{Invocation, ToolOutput},
};

/// Work a step performs between its precondition and its postcondition.
#[async_trait]
pub trait Action: Send + Sync {
    /// Short description for logs, e.g. the redacted command line.
    fn describe(&self) -> String;

    async fn execute(&self, context: &RunContext) -> Result<()>;
}

/// Build the action an authored step declares.
pub fn action_from_definition(definition: &ActionDefinition) -> Result<Arc<dyn Action>, CommandLineError> {
    Ok(match definition {
        ActionDefinition::Run(command_line) => Arc::new(RunCommand::parse(command_line)?),
        ActionDefinition::StripFinalizers { namespace } => Arc::new(StripFinalizers::new(namespace.clone())),
        ActionDefinition::PortForward {
            target,
            namespace,
            local_port,
            remote_port,
        } => Arc::new(PortForward::new(target.clone(), namespace.clone(), *local_port, *remote_port)),
    })
}

/// One tool invocation whose arguments may contain `${{ ... }}` templates.
#[derive(Debug, Clone)]
pub struct RunCommand {
    argv: Vec<String>,
}

impl RunCommand {
    pub fn parse(command_line: &str) -> Result<Self, CommandLineError> {
        Ok(Self {
            argv: split_command_line(command_line)?,
        })
    }

    /// Build from already separated arguments; templates are still resolved per argument.
    pub fn from_argv<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
        }
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    fn resolve(&self, context: &RunContext) -> Result<Invocation> {
        let resolved = self
            .argv
            .iter()
            .map(|argument| resolve_templates(argument, context))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|unresolved| anyhow!("{}: {unresolved}", self.describe()))?;
        let (tool, args) = resolved.split_first().ok_or_else(|| anyhow!("empty command"))?;
        Ok(Invocation::new(tool.clone(), args.iter().cloned()).with_timeout(context.config.timeouts.tool))
    }
}

#[async_trait]
impl Action for RunCommand {
    fn describe(&self) -> String {
        redact_sensitive(&self.argv.join(" "))
    }

    async fn execute(&self, context: &RunContext) -> Result<()> {
        let invocation = self.resolve(context)?;
        info!(command = %invocation.display_redacted(), "running");
        let output = context.tools.run(&invocation).await?;
        ensure_success(&invocation, &output)
    }
}

fn ensure_success(invocation: &Invocation, output: &ToolOutput) -> Result<()> {
    if output.success() {
        return Ok(());
    }
    let status = output.status.map_or_else(|| "a signal".to_string(), |code| format!("status {code}"));
    bail!("`{}` exited with {status}: {}", invocation.display_redacted(), output.message())
}

/// Clear the finalizers of a namespace stuck in `Terminating`.
///
/// With a grace period the namespace gets that long to finish terminating on its own first.
#[derive(Debug, Clone)]
pub struct StripFinalizers {
    namespace: String,
    grace: Duration,
}

const TERMINATION_POLL: Duration = Duration::from_secs(2);

impl StripFinalizers {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            grace: Duration::ZERO,
        }
    }

    pub fn after(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Current namespace document, or `None` once it is gone.
    async fn lookup(&self, context: &RunContext) -> Result<Option<Value>> {
        let [context_flag, kube_context] = context.kube_context_args();
        let lookup = Invocation::new(
            "kubectl",
            [
                context_flag.as_str(),
                kube_context.as_str(),
                "get",
                "namespace",
                self.namespace.as_str(),
                "-o",
                "json",
            ],
        )
        .with_timeout(context.config.timeouts.tool);
        let output = context.tools.run(&lookup).await?;
        if !output.success() {
            if output.stderr.contains("NotFound") {
                return Ok(None);
            }
            ensure_success(&lookup, &output)?;
        }
        let namespace = serde_json::from_str(&output.stdout).context("unreadable namespace document")?;
        Ok(Some(namespace))
    }
}

fn is_terminating(namespace: &Value) -> bool {
    namespace.pointer("/status/phase").and_then(Value::as_str) == Some("Terminating")
}

#[async_trait]
impl Action for StripFinalizers {
    fn describe(&self) -> String {
        format!("strip finalizers from namespace {}", self.namespace)
    }

    async fn execute(&self, context: &RunContext) -> Result<()> {
        let deadline = Instant::now() + self.grace;
        let mut namespace = loop {
            let Some(namespace) = self.lookup(context).await? else {
                return Ok(());
            };
            if !is_terminating(&namespace) {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                break namespace;
            }
            tokio::time::sleep(TERMINATION_POLL.min(deadline - now)).await;
        };

        let [context_flag, kube_context] = context.kube_context_args();
        let Some(spec) = namespace.get_mut("spec").and_then(Value::as_object_mut) else {
            return Ok(());
        };
        spec.insert("finalizers".to_string(), Value::Array(Vec::new()));

        warn!(namespace = %self.namespace, "namespace stuck terminating; clearing finalizers");
        let finalize_path = format!("/api/v1/namespaces/{}/finalize", self.namespace);
        let replace = Invocation::new(
            "kubectl",
            [
                context_flag.as_str(),
                kube_context.as_str(),
                "replace",
                "--raw",
                finalize_path.as_str(),
                "-f",
                "-",
            ],
        )
        .with_stdin(serde_json::to_string(&namespace)?)
        .with_timeout(context.config.timeouts.tool);
        let output = context.tools.run(&replace).await?;
        ensure_success(&replace, &output)
    }
}

/// Hold `kubectl port-forward` open until the run ends.
#[derive(Debug, Clone)]
pub struct PortForward {
    target: String,
    namespace: String,
    local_port: u16,
    remote_port: u16,
}

impl PortForward {
    pub fn new(target: impl Into<String>, namespace: impl Into<String>, local_port: u16, remote_port: u16) -> Self {
        Self {
            target: target.into(),
            namespace: namespace.into(),
            local_port,
            remote_port,
        }
    }
}

#[async_trait]
impl Action for PortForward {
    fn describe(&self) -> String {
        format!(
            "port-forward {} -n {} {}:{}",
            self.target, self.namespace, self.local_port, self.remote_port
        )
    }

    async fn execute(&self, context: &RunContext) -> Result<()> {
        let [context_flag, kube_context] = context.kube_context_args();
        let ports = format!("{}:{}", self.local_port, self.remote_port);
        let invocation = Invocation::new(
            "kubectl",
            [
                context_flag.as_str(),
                kube_context.as_str(),
                "port-forward",
                "-n",
                self.namespace.as_str(),
                self.target.as_str(),
                ports.as_str(),
            ],
        );
        let lease = context.tools.spawn(&invocation).await?;
        context.leases.hold(lease).await;
        Ok(())
    }
}

/// `kubectl apply -f -` of an inline manifest. Templates in the manifest resolve at run time.
#[derive(Debug, Clone)]
pub struct ApplyManifest {
    label: String,
    manifest: String,
}

impl ApplyManifest {
    pub fn new(label: impl Into<String>, manifest: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            manifest: manifest.into(),
        }
    }
}

#[async_trait]
impl Action for ApplyManifest {
    fn describe(&self) -> String {
        format!("apply {}", self.label)
    }

    async fn execute(&self, context: &RunContext) -> Result<()> {
        let manifest = resolve_templates(&self.manifest, context).map_err(|unresolved| anyhow!("{}: {unresolved}", self.describe()))?;
        let [context_flag, kube_context] = context.kube_context_args();
        let invocation = Invocation::new("kubectl", [context_flag.as_str(), kube_context.as_str(), "apply", "-f", "-"])
            .with_stdin(manifest)
            .with_timeout(context.config.timeouts.tool);
        info!(manifest = %self.label, "applying manifest");
        let output = context.tools.run(&invocation).await?;
        ensure_success(&invocation, &output)
    }
}

/// Several actions run in order; the first error stops the sequence.
pub struct Sequence {
    actions: Vec<Arc<dyn Action>>,
}

impl Sequence {
    pub fn new(actions: Vec<Arc<dyn Action>>) -> Self {
        Self { actions }
    }
}

#[async_trait]
impl Action for Sequence {
    fn describe(&self) -> String {
        self.actions.iter().map(|action| action.describe()).collect::<Vec<_>>().join(" && ")
    }

    async fn execute(&self, context: &RunContext) -> Result<()> {
        for action in &self.actions {
            action.execute(context).await?;
        }
        Ok(())
    }
}
