//! Plan execution.
//!
//! The runner walks the stages of a plan on the calling task. Concurrent groups fan out to a
//! bounded set of Tokio workers that report outcomes over a channel; the runner alone applies
//! failure policies and appends to the report.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use stagehand_types::{FailureDecision, FailureKind, OnFailure, ResourceKind, RunReport, SkipReason, StepOutcome};
use stagehand_util::config::StagehandConfig;
use tokio::{
    sync::{Semaphore, mpsc},
    task::JoinSet,
};
use tracing::{debug, info, warn};

use crate::{
    context::RunContext,
    plan::{Plan, Stage},
    step::{Step, StepSettings, run_step},
};

const PLAN_TIMEOUT: &str = "plan timeout";

/// Asks an operator how to resolve a `prompt` failure.
#[async_trait]
pub trait Prompter: Send + Sync {
    async fn decide(&self, outcome: &StepOutcome) -> FailureDecision;
}

/// Progress notifications emitted while a plan runs.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    StepStarted { step: String },
    StepFinished(StepOutcome),
    /// The plan stopped early; `remaining` steps were recorded as skipped without running.
    Halted { cause: String, remaining: usize },
}

/// Run-wide settings derived from configuration.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub step: StepSettings,
    pub plan_timeout: Option<Duration>,
    /// Resolution of `prompt` failures when nobody can answer and the step names no default.
    pub prompt_default: FailureDecision,
    /// Cap on concurrently running group members; `None` runs every member of a group at once.
    pub max_parallel: Option<usize>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            step: StepSettings::default(),
            plan_timeout: None,
            prompt_default: FailureDecision::Abort,
            max_parallel: None,
        }
    }
}

impl RunSettings {
    pub fn from_config(config: &StagehandConfig) -> Self {
        Self {
            step: StepSettings {
                retry: config.retry.clone(),
                probe_timeout: config.timeouts.probe,
            },
            plan_timeout: config.timeouts.plan,
            prompt_default: config.prompt_default,
            ..Self::default()
        }
    }
}

/// Executes plans and produces run reports.
#[derive(Default)]
pub struct Runner {
    settings: RunSettings,
    prompter: Option<Arc<dyn Prompter>>,
    events: Option<mpsc::UnboundedSender<RunEvent>>,
    keep: Vec<ResourceKind>,
}

impl Runner {
    pub fn new(settings: RunSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    pub fn prompter(mut self, prompter: Arc<dyn Prompter>) -> Self {
        self.prompter = Some(prompter);
        self
    }

    pub fn events(mut self, sender: mpsc::UnboundedSender<RunEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    /// Skip steps whose target resource is of one of these kinds.
    pub fn keep(mut self, kinds: Vec<ResourceKind>) -> Self {
        self.keep = kinds;
        self
    }

    pub fn max_parallel(mut self, workers: usize) -> Self {
        self.settings.max_parallel = Some(workers.max(1));
        self
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Run every stage of `plan` and return the finalized report.
    ///
    /// Never fails: every problem ends up as a step outcome. Leases acquired by actions are
    /// released before returning.
    pub async fn execute(&self, plan: &Plan, context: Arc<RunContext>) -> RunReport {
        let started = Instant::now();
        let plan_deadline = self.settings.plan_timeout.map(|budget| started + budget);
        info!(plan = %plan.name(), steps = plan.step_count(), environment = %context.environment, "plan execution started");

        let mut execution = Execution {
            report: RunReport::begin(plan.name(), Some(context.environment)),
            satisfied: HashMap::new(),
            halted: None,
            remaining: 0,
        };

        for stage in plan.stages() {
            if execution.halted.is_none() && plan_deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                warn!(plan = %plan.name(), "plan time budget exhausted");
                execution.report.mark_aborted(PLAN_TIMEOUT);
                execution.halted = Some(SkipReason::PlanTimeout);
            }
            if let Some(reason) = execution.halted {
                for step in stage.steps() {
                    execution.remaining += 1;
                    execution.report.record(StepOutcome::skipped(step.name(), step.policy(), reason, Duration::ZERO));
                }
                continue;
            }

            let runnable = self.admit(stage, &mut execution);
            match (stage, runnable.as_slice()) {
                (_, []) => {}
                (Stage::Single(_), [step]) => {
                    self.emit(RunEvent::StepStarted {
                        step: step.name().to_string(),
                    });
                    let outcome = run_step(step, &context, &self.settings.step, plan_deadline).await;
                    self.settle(&mut execution, step, outcome, &context, plan_deadline).await;
                }
                (_, steps) => self.run_group(stage.label(), steps, &mut execution, &context, plan_deadline).await,
            }
        }

        if execution.halted.is_some() {
            self.emit(RunEvent::Halted {
                cause: execution.report.aborted_by.clone().unwrap_or_default(),
                remaining: execution.remaining,
            });
        }

        let released = context.leases.release_all().await;
        if released > 0 {
            debug!(plan = %plan.name(), released, "released background processes");
        }

        let report = execution.report.finalize();
        let counts = report.counts();
        info!(
            plan = %plan.name(),
            succeeded = counts.succeeded,
            failed = counts.failed,
            warned = counts.warned,
            skipped = counts.skipped,
            "plan execution finished"
        );
        report
    }

    /// Record pre-dispatch skips for a stage and return the steps that should run.
    fn admit<'a>(&self, stage: &'a Stage, execution: &mut Execution) -> Vec<&'a Step> {
        let mut runnable = Vec::new();
        for step in stage.steps() {
            let reason = if self.keep.contains(&step.target_kind()) {
                Some(SkipReason::Kept)
            } else if step
                .dependencies()
                .iter()
                .any(|dependency| !execution.satisfied.get(dependency).copied().unwrap_or(false))
            {
                Some(SkipReason::DependencyNotSatisfied)
            } else {
                None
            };
            match reason {
                Some(reason) => {
                    info!(step = %step.name(), %reason, "step not started");
                    self.finish(execution, StepOutcome::skipped(step.name(), step.policy(), reason, Duration::ZERO));
                }
                None => runnable.push(step),
            }
        }
        runnable
    }

    async fn run_group(
        &self,
        group: &str,
        steps: &[&Step],
        execution: &mut Execution,
        context: &Arc<RunContext>,
        plan_deadline: Option<Instant>,
    ) {
        debug!(group, members = steps.len(), "dispatching concurrent group");
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let workers_allowed = self.settings.max_parallel.unwrap_or(steps.len()).max(1);
        let permits = Arc::new(Semaphore::new(workers_allowed));
        let mut workers = JoinSet::new();

        for step in steps {
            let step = (*step).clone();
            let context = Arc::clone(context);
            let settings = self.settings.step.clone();
            let sender = sender.clone();
            let permits = Arc::clone(&permits);
            let events = self.events.clone();
            workers.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                if let Some(events) = &events {
                    let _ = events.send(RunEvent::StepStarted {
                        step: step.name().to_string(),
                    });
                }
                let outcome = run_step(&step, &context, &settings, plan_deadline).await;
                let _ = sender.send(outcome);
            });
        }
        drop(sender);

        let mut reported = HashSet::new();
        while let Some(outcome) = receiver.recv().await {
            let Some(step) = steps.iter().find(|step| step.name() == outcome.step) else {
                continue;
            };
            reported.insert(outcome.step.clone());
            self.settle(execution, step, outcome, context, plan_deadline).await;
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(error) = joined {
                warn!(group, %error, "group worker ended abnormally");
            }
        }

        for step in steps.iter().filter(|step| !reported.contains(step.name())) {
            let outcome = StepOutcome::failed(
                step.name(),
                step.policy(),
                FailureKind::ActionFailed,
                0,
                Duration::ZERO,
                "worker ended without reporting an outcome",
            );
            self.settle(execution, step, outcome, context, plan_deadline).await;
        }
    }

    /// Apply the failure policy to a finished step and record it.
    async fn settle(
        &self,
        execution: &mut Execution,
        step: &Step,
        outcome: StepOutcome,
        context: &RunContext,
        plan_deadline: Option<Instant>,
    ) {
        if !outcome.is_failure() {
            self.finish(execution, outcome);
            return;
        }

        let cut_by_plan = outcome.failure == Some(FailureKind::BudgetExceeded)
            && plan_deadline.is_some_and(|deadline| Instant::now() >= deadline);
        let decision = if cut_by_plan || outcome.failure.is_some_and(FailureKind::always_aborts) {
            FailureDecision::Abort
        } else {
            match step.policy() {
                OnFailure::Abort => FailureDecision::Abort,
                OnFailure::Continue => FailureDecision::Continue,
                OnFailure::Prompt => self.prompt(step, &outcome, context).await,
            }
        };

        let outcome = outcome.with_decision(decision);
        if decision == FailureDecision::Abort && execution.halted.is_none() {
            if cut_by_plan {
                warn!(step = %step.name(), "plan time budget exhausted");
                execution.report.mark_aborted(PLAN_TIMEOUT);
                execution.halted = Some(SkipReason::PlanTimeout);
            } else {
                warn!(step = %step.name(), failure = ?outcome.failure, "aborting plan");
                execution.report.mark_aborted(step.name());
                execution.halted = Some(SkipReason::PlanAborted);
            }
        }
        self.finish(execution, outcome);
    }

    async fn prompt(&self, step: &Step, outcome: &StepOutcome, context: &RunContext) -> FailureDecision {
        match &self.prompter {
            Some(prompter) if context.interactive => prompter.decide(outcome).await,
            _ => {
                let decision = step.default_decision().unwrap_or(self.settings.prompt_default);
                info!(step = %step.name(), ?decision, "non-interactive run; applying prompt default");
                decision
            }
        }
    }

    fn finish(&self, execution: &mut Execution, outcome: StepOutcome) {
        execution
            .satisfied
            .insert(outcome.step.clone(), outcome.satisfies_dependents());
        self.emit(RunEvent::StepFinished(outcome.clone()));
        execution.report.record(outcome);
    }

    fn emit(&self, event: RunEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("settings", &self.settings)
            .field("interactive_prompts", &self.prompter.is_some())
            .field("keep", &self.keep)
            .finish()
    }
}

struct Execution {
    report: RunReport,
    satisfied: HashMap<String, bool>,
    halted: Option<SkipReason>,
    /// Steps skipped because the plan halted before reaching them.
    remaining: usize,
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use stagehand_types::{ReadinessState, ResourceRef, RetryPolicy, StepState};

    use super::*;
    use crate::{
        check::Check,
        probe::{Probe, ProbeError},
        testing::{ScriptedProbe, ScriptedTools, SpyAction},
    };

    struct Answer(FailureDecision);

    #[async_trait]
    impl Prompter for Answer {
        async fn decide(&self, _outcome: &StepOutcome) -> FailureDecision {
            self.0
        }
    }

    fn context(interactive: bool) -> Arc<RunContext> {
        Arc::new(
            RunContext::new(Arc::new(StagehandConfig::default()), Default::default(), Arc::new(ScriptedTools::new()))
                .interactive(interactive),
        )
    }

    fn runner() -> Runner {
        Runner::new(RunSettings {
            step: StepSettings {
                retry: RetryPolicy::fixed(2, Duration::from_millis(1)),
                probe_timeout: Duration::from_secs(1),
            },
            ..RunSettings::default()
        })
    }

    fn ready(name: &str) -> Step {
        Step::new(name, Check::present(ScriptedProbe::always(ReadinessState::Ready), ResourceRef::namespace(name)))
    }

    fn broken(name: &str, policy: OnFailure) -> Step {
        Step::new(name, Check::present(ScriptedProbe::always(ReadinessState::Failed), ResourceRef::namespace(name)))
            .on_failure(policy)
    }

    #[tokio::test]
    async fn prompt_uses_operator_answer_when_interactive() {
        let plan = Plan::builder("p")
            .step(broken("flaky", OnFailure::Prompt))
            .step(ready("after"))
            .build()
            .unwrap();

        let report = runner()
            .prompter(Arc::new(Answer(FailureDecision::Continue)))
            .execute(&plan, context(true))
            .await;
        assert_eq!(report.outcome("flaky").and_then(|outcome| outcome.decision), Some(FailureDecision::Continue));
        assert!(report.outcome("after").is_some_and(StepOutcome::is_success));
        assert_eq!(report.exit_code(), stagehand_types::EXIT_PARTIAL);
    }

    #[tokio::test]
    async fn prompt_falls_back_to_defaults_without_operator() {
        let plan = Plan::builder("p")
            .step(broken("step-default", OnFailure::Prompt).prompt_default(FailureDecision::Continue))
            .step(broken("config-default", OnFailure::Prompt))
            .step(ready("never"))
            .build()
            .unwrap();

        let report = runner()
            .prompter(Arc::new(Answer(FailureDecision::Continue)))
            .execute(&plan, context(false))
            .await;
        assert_eq!(report.outcome("step-default").and_then(|outcome| outcome.decision), Some(FailureDecision::Continue));
        assert_eq!(report.outcome("config-default").and_then(|outcome| outcome.decision), Some(FailureDecision::Abort));
        assert_eq!(report.outcome("never").and_then(|outcome| outcome.skip_reason), Some(SkipReason::PlanAborted));
        assert_eq!(report.aborted_by.as_deref(), Some("config-default"));
    }

    #[tokio::test]
    async fn kept_steps_block_dependents() {
        let action = SpyAction::succeeding("kind delete cluster");
        let plan = Plan::builder("teardown")
            .step(ready("delete-namespace"))
            .step(
                Step::new("delete-cluster", Check::gone(ScriptedProbe::always(ReadinessState::Absent), ResourceRef::cluster("dota2-ml")))
                    .action(action.clone())
                    .depends_on(["delete-namespace"]),
            )
            .build()
            .unwrap();

        let report = runner().keep(vec![ResourceKind::Namespace]).execute(&plan, context(false)).await;
        assert_eq!(report.outcome("delete-namespace").and_then(|outcome| outcome.skip_reason), Some(SkipReason::Kept));
        assert_eq!(
            report.outcome("delete-cluster").and_then(|outcome| outcome.skip_reason),
            Some(SkipReason::DependencyNotSatisfied)
        );
        assert_eq!(action.invocations(), 0);
        assert_eq!(report.exit_code(), stagehand_types::EXIT_SUCCESS);
    }

    #[tokio::test]
    async fn events_stream_every_outcome() {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let plan = Plan::builder("p").step(ready("a")).step(ready("b").depends_on(["a"])).build().unwrap();

        let report = runner().events(sender).execute(&plan, context(false)).await;
        drop(report);

        let mut finished = Vec::new();
        let mut started = 0;
        while let Ok(event) = receiver.try_recv() {
            match event {
                RunEvent::StepStarted { .. } => started += 1,
                RunEvent::StepFinished(outcome) => finished.push((outcome.step, outcome.state)),
                RunEvent::Halted { .. } => panic!("plan should not halt"),
            }
        }
        assert_eq!(started, 2);
        assert_eq!(finished, vec![("a".to_string(), StepState::Success), ("b".to_string(), StepState::Success)]);
    }

    /// Counts how many checks are in flight at once.
    #[derive(Default)]
    struct Overlap {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Probe for Overlap {
        fn name(&self) -> &str {
            "overlap"
        }

        async fn check(&self, _resource: &ResourceRef) -> Result<ReadinessState, ProbeError> {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(active, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(ReadinessState::Ready)
        }
    }

    #[tokio::test]
    async fn every_group_member_runs_at_once() {
        let overlap = Arc::new(Overlap::default());
        let mut builder = Plan::builder("status");
        for index in 0..8 {
            let name = format!("resource-{index}");
            builder = builder.step(Step::new(&name, Check::present(overlap.clone(), ResourceRef::namespace(&name))).group("resources"));
        }
        let plan = builder.build().unwrap();

        let report = runner().execute(&plan, context(false)).await;
        assert_eq!(report.counts().succeeded, 8);
        assert_eq!(overlap.peak.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn max_parallel_caps_group_members() {
        let overlap = Arc::new(Overlap::default());
        let mut builder = Plan::builder("status");
        for index in 0..6 {
            let name = format!("resource-{index}");
            builder = builder.step(Step::new(&name, Check::present(overlap.clone(), ResourceRef::namespace(&name))).group("resources"));
        }
        let plan = builder.build().unwrap();

        let report = runner().max_parallel(2).execute(&plan, context(false)).await;
        assert_eq!(report.counts().succeeded, 6);
        assert_eq!(overlap.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn halted_plan_reports_remainder_once() {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let plan = Plan::builder("p")
            .step(broken("gate", OnFailure::Abort))
            .step(ready("first"))
            .step(ready("second"))
            .build()
            .unwrap();

        let report = runner().events(sender).execute(&plan, context(false)).await;
        assert_eq!(report.outcome("second").and_then(|outcome| outcome.skip_reason), Some(SkipReason::PlanAborted));

        let mut finished = 0;
        let mut halted = None;
        while let Ok(event) = receiver.try_recv() {
            match event {
                RunEvent::StepFinished(_) => finished += 1,
                RunEvent::Halted { cause, remaining } => halted = Some((cause, remaining)),
                RunEvent::StepStarted { .. } => {}
            }
        }
        assert_eq!(finished, 1);
        assert_eq!(halted, Some(("gate".to_string(), 2)));
    }

    #[tokio::test]
    async fn plan_timeout_aborts_remaining_steps() {
        let slow = Step::new("slow", Check::present(ScriptedProbe::always(ReadinessState::Pending), ResourceRef::namespace("slow")))
            .retry(RetryPolicy::fixed(1000, Duration::from_millis(10)))
            .on_failure(OnFailure::Continue);
        let plan = Plan::builder("p").step(slow).step(ready("later")).build().unwrap();

        let mut settings = runner().settings().clone();
        settings.plan_timeout = Some(Duration::from_millis(50));
        let report = Runner::new(settings).execute(&plan, context(false)).await;

        assert_eq!(report.outcome("slow").and_then(|outcome| outcome.failure), Some(FailureKind::BudgetExceeded));
        assert_eq!(report.outcome("later").and_then(|outcome| outcome.skip_reason), Some(SkipReason::PlanTimeout));
        assert_eq!(report.aborted_by.as_deref(), Some("plan timeout"));
        assert_eq!(report.exit_code(), stagehand_types::EXIT_ABORTED);
    }
}
