//! Shared type definitions for Stagehand.
//!
//! These types describe resources, readiness, step policies, outcomes, and run reports. They are
//! consumed by the engine while executing plans and by the CLI when rendering and exiting.

pub mod duration;
pub mod environment;
pub mod outcome;
pub mod plan;
pub mod policy;
pub mod readiness;
pub mod report;
pub mod resource;

pub use environment::{Environment, UnknownEnvironment};
pub use outcome::{FailureKind, SkipReason, StepOutcome, StepState};
pub use plan::{ActionDefinition, CheckDefinition, PlanDefinition, PlanKind, StepDefinition};
pub use policy::{FailureDecision, OnFailure, RetryPolicy};
pub use readiness::{Expectation, ReadinessState};
pub use report::{EXIT_ABORTED, EXIT_PARTIAL, EXIT_SUCCESS, OutcomeCounts, RunReport, RunStatus};
pub use resource::{ResourceKind, ResourceRef, UnknownResourceKind, parse_kind_list};
