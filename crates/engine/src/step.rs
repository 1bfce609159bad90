//! Steps and the single-step algorithm.
//!
//! A step is skipped when its precondition already holds, otherwise it runs its action and then
//! polls its postcondition under a bounded retry policy. The whole sequence is capped by the
//! step budget and by whatever remains of the plan budget.

use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use stagehand_types::{
    FailureDecision, FailureKind, OnFailure, ReadinessState, ResourceKind, RetryPolicy, SkipReason, StepOutcome, StepState,
};
use stagehand_util::redact_sensitive;
use tracing::{debug, info, warn};

use crate::{actions::Action, check::Check, context::RunContext};

/// Immutable description of one idempotent unit of work.
#[derive(Clone)]
pub struct Step {
    name: String,
    description: Option<String>,
    precondition: Option<Check>,
    action: Option<Arc<dyn Action>>,
    postcondition: Check,
    retry: Option<RetryPolicy>,
    on_failure: OnFailure,
    prompt_default: Option<FailureDecision>,
    budget: Option<Duration>,
    depends_on: Vec<String>,
    group: Option<String>,
}

impl Step {
    pub fn new(name: impl Into<String>, postcondition: Check) -> Self {
        Self {
            name: name.into(),
            description: None,
            precondition: None,
            action: None,
            postcondition,
            retry: None,
            on_failure: OnFailure::Abort,
            prompt_default: None,
            budget: None,
            depends_on: Vec::new(),
            group: None,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn precondition(mut self, check: Check) -> Self {
        self.precondition = Some(check);
        self
    }

    pub fn action(mut self, action: Arc<dyn Action>) -> Self {
        self.action = Some(action);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn on_failure(mut self, policy: OnFailure) -> Self {
        self.on_failure = policy;
        self
    }

    /// Resolution of a `prompt` policy when nobody can answer.
    pub fn prompt_default(mut self, decision: FailureDecision) -> Self {
        self.prompt_default = Some(decision);
        self
    }

    pub fn budget(mut self, budget: Duration) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(dependencies.into_iter().map(Into::into));
        self
    }

    /// Run concurrently with the other members of `group`.
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn dependencies(&self) -> &[String] {
        &self.depends_on
    }

    pub fn group_name(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub fn policy(&self) -> OnFailure {
        self.on_failure
    }

    pub fn default_decision(&self) -> Option<FailureDecision> {
        self.prompt_default
    }

    pub fn postcondition(&self) -> &Check {
        &self.postcondition
    }

    pub fn has_action(&self) -> bool {
        self.action.is_some()
    }

    /// Kind of the resource this step converges; `--keep` matches against it.
    pub fn target_kind(&self) -> ResourceKind {
        self.postcondition.resource().kind
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("precondition", &self.precondition)
            .field("action", &self.action.as_ref().map(|action| action.describe()))
            .field("postcondition", &self.postcondition)
            .field("on_failure", &self.on_failure)
            .field("depends_on", &self.depends_on)
            .field("group", &self.group)
            .finish()
    }
}

/// Run-wide defaults a step falls back to.
#[derive(Debug, Clone)]
pub struct StepSettings {
    pub retry: RetryPolicy,
    pub probe_timeout: Duration,
}

impl Default for StepSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Default)]
struct Progress {
    attempts: u32,
    last_observed: Option<ReadinessState>,
}

/// Execute one step and describe what happened. Never returns an error.
///
/// `plan_deadline` caps the step in addition to its own budget.
pub async fn run_step(step: &Step, context: &RunContext, settings: &StepSettings, plan_deadline: Option<Instant>) -> StepOutcome {
    let started = Instant::now();
    let budget_deadline = step.budget.map(|budget| started + budget);
    let deadline = match (budget_deadline, plan_deadline) {
        (Some(budget), Some(plan)) => Some(budget.min(plan)),
        (budget, plan) => budget.or(plan),
    };

    info!(step = %step.name, "step started");
    let mut progress = Progress::default();
    let outcome = match deadline {
        None => drive_step(step, context, settings, started, &mut progress).await,
        Some(deadline) => {
            let bounded = tokio::time::timeout_at(deadline.into(), drive_step(step, context, settings, started, &mut progress)).await;
            match bounded {
                Ok(outcome) => outcome,
                Err(_) => {
                    let cause = if budget_deadline == Some(deadline) {
                        "step budget exhausted"
                    } else {
                        "plan time budget exhausted"
                    };
                    StepOutcome::failed(
                        &step.name,
                        step.on_failure,
                        FailureKind::BudgetExceeded,
                        progress.attempts,
                        started.elapsed(),
                        format!("{cause} after {:?}", started.elapsed()),
                    )
                    .with_observed(progress.last_observed)
                }
            }
        }
    };

    match outcome.state {
        StepState::Success => info!(step = %step.name, attempts = outcome.attempts, "step succeeded"),
        StepState::Skipped => info!(step = %step.name, reason = ?outcome.skip_reason, "step skipped"),
        StepState::Failure => {
            warn!(step = %step.name, attempts = outcome.attempts, failure = ?outcome.failure, "step failed")
        }
    }
    outcome
}

async fn drive_step(
    step: &Step,
    context: &RunContext,
    settings: &StepSettings,
    started: Instant,
    progress: &mut Progress,
) -> StepOutcome {
    if let Some(precondition) = &step.precondition {
        match precondition.evaluate(settings.probe_timeout).await {
            Ok(ReadinessState::Ready) => {
                return StepOutcome::skipped(&step.name, step.on_failure, SkipReason::AlreadySatisfied, started.elapsed())
                    .with_observed(Some(ReadinessState::Ready));
            }
            Ok(observed) => debug!(step = %step.name, %observed, "precondition not yet satisfied"),
            Err(error) => {
                return StepOutcome::failed(
                    &step.name,
                    step.on_failure,
                    FailureKind::PreconditionUnknown,
                    0,
                    started.elapsed(),
                    format!("precondition {precondition}: {error}"),
                );
            }
        }
    }

    if let Some(action) = &step.action {
        debug!(step = %step.name, action = %action.describe(), "executing action");
        if let Err(error) = action.execute(context).await {
            return StepOutcome::failed(
                &step.name,
                step.on_failure,
                FailureKind::ActionFailed,
                0,
                started.elapsed(),
                redact_sensitive(&format!("{error:#}")),
            );
        }
    }

    let policy = step.retry.as_ref().unwrap_or(&settings.retry);
    let limit = policy.attempt_limit();
    let mut last_error: Option<String> = None;

    for attempt in 1..=limit {
        progress.attempts = attempt;
        match step.postcondition.evaluate(settings.probe_timeout).await {
            Ok(ReadinessState::Ready) => {
                return StepOutcome::succeeded(&step.name, step.on_failure, attempt, started.elapsed());
            }
            Ok(ReadinessState::Failed) => {
                return StepOutcome::failed(
                    &step.name,
                    step.on_failure,
                    FailureKind::PostconditionFailed,
                    attempt,
                    started.elapsed(),
                    format!("{} reported failed", step.postcondition),
                )
                .with_observed(Some(ReadinessState::Failed));
            }
            Ok(observed) => {
                progress.last_observed = Some(observed);
                debug!(step = %step.name, attempt, %observed, "postcondition not ready");
            }
            Err(error) if error.is_unavailable() => {
                return StepOutcome::failed(
                    &step.name,
                    step.on_failure,
                    FailureKind::PreconditionUnknown,
                    attempt,
                    started.elapsed(),
                    format!("postcondition {}: {error}", step.postcondition),
                )
                .with_observed(progress.last_observed);
            }
            Err(error) => {
                debug!(step = %step.name, attempt, %error, "postcondition probe inconclusive");
                last_error = Some(error.to_string());
            }
        }
        if attempt < limit {
            tokio::time::sleep(policy.delay_after(attempt)).await;
        }
    }

    let mut detail = format!("{} not ready after {limit} polls", step.postcondition);
    if let Some(observed) = progress.last_observed {
        detail.push_str(&format!("; last observed {observed}"));
    }
    if let Some(error) = last_error {
        detail.push_str(&format!("; last error: {error}"));
    }
    StepOutcome::failed(
        &step.name,
        step.on_failure,
        FailureKind::PostconditionTimeout,
        limit,
        started.elapsed(),
        detail,
    )
    .with_observed(progress.last_observed)
}
