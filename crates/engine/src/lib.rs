//! # Stagehand Engine
//!
//! The engine executes declarative provisioning and teardown plans. A plan is a dependency-ordered
//! set of steps; every step pairs an optional precondition, an optional action, and a postcondition
//! that is polled with bounded backoff until the external system reports the goal state.
//!
//! ## Key Features
//!
//! - **Idempotent steps**: a satisfied precondition skips the action entirely
//! - **Readiness probes**: kubectl, Helm, ArgoCD, kind, HTTP, and installed-tool checks
//! - **Failure policies**: abort, continue, or prompt per step, with plan-wide time budgets
//! - **Concurrent groups**: bounded fan-out for independent steps such as namespace deletion
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use stagehand_engine::{Catalog, ProbeSet, ProcessToolRunner, RunContext, Runner, RunSettings};
//! use stagehand_types::Environment;
//! use stagehand_util::config::StagehandConfig;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let config = Arc::new(StagehandConfig::default());
//! let tools = Arc::new(ProcessToolRunner::new(config.tools.clone(), config.timeouts.tool));
//! let probes = ProbeSet::new(tools.clone(), &config)?;
//! let plan = Catalog::new(&probes, &config, Environment::Dev).provision("data-plane")?;
//!
//! let context = Arc::new(RunContext::new(config.clone(), Environment::Dev, tools));
//! let report = Runner::new(RunSettings::from_config(&config)).execute(&plan, context).await;
//! println!("exit code {}", report.exit_code());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **`probe`**: read-only readiness checks per resource kind
//! - **`step`** and **`check`**: the single-step algorithm
//! - **`plan`** and **`runner`**: stage ordering, failure policies, and the run report
//! - **`catalog`** and **`document`**: built-in plans and authored plan documents
//! - **`tools`** and **`lease`**: subprocess execution and background processes owned by a run

pub mod actions;
pub mod catalog;
pub mod check;
pub mod context;
pub mod document;
pub mod lease;
pub mod plan;
pub mod probe;
pub mod report;
pub mod runner;
pub mod step;
pub mod templates;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tools;

pub use actions::{Action, ApplyManifest, PortForward, RunCommand, Sequence, StripFinalizers, action_from_definition};
pub use catalog::{Catalog, CatalogEntry, CatalogError};
pub use check::Check;
pub use context::RunContext;
pub use document::{load_plan_document, parse_plan_document, plan_from_definition};
pub use lease::{ChildLease, Lease, LeaseSet};
pub use plan::{Plan, PlanBuilder, PlanError, Stage};
pub use probe::{Probe, ProbeError, ProbeSet};
pub use report::{ReportFormat, Reporter, UnknownReportFormat, render_halted_line, render_step_line};
pub use runner::{Prompter, RunEvent, RunSettings, Runner};
pub use step::{Step, StepSettings, run_step};
pub use templates::{UnresolvedTemplates, resolve_templates};
pub use tools::{Invocation, ProcessToolRunner, ToolError, ToolOutput, ToolRunner};
