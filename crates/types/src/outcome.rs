//! Step outcomes recorded by the runner.

use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{FailureDecision, OnFailure, ReadinessState, duration};

/// Terminal state of a step within one plan execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Success,
    Failure,
    Skipped,
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StepState::Success => "success",
            StepState::Failure => "failure",
            StepState::Skipped => "skipped",
        };
        f.write_str(label)
    }
}

/// Why a step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A probe could not be evaluated at all (tool missing, API unreachable).
    PreconditionUnknown,
    /// The step action returned an error.
    ActionFailed,
    /// The postcondition never became ready within the retry policy.
    PostconditionTimeout,
    /// The postcondition reported the resource as broken.
    PostconditionFailed,
    /// The step exceeded its wall-clock budget.
    BudgetExceeded,
}

impl FailureKind {
    /// Failures that stop the plan no matter which policy the step declares.
    pub fn always_aborts(self) -> bool {
        matches!(self, FailureKind::PreconditionUnknown)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::PreconditionUnknown => "precondition unknown",
            FailureKind::ActionFailed => "action failed",
            FailureKind::PostconditionTimeout => "postcondition timeout",
            FailureKind::PostconditionFailed => "postcondition failed",
            FailureKind::BudgetExceeded => "budget exceeded",
        };
        f.write_str(label)
    }
}

/// Why a step did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The precondition reported the goal state already holds.
    AlreadySatisfied,
    /// An earlier abort-class failure stopped the plan.
    PlanAborted,
    /// The plan-level time budget ran out.
    PlanTimeout,
    /// A dependency failed or was itself skipped without being satisfied.
    DependencyNotSatisfied,
    /// The operator asked to keep resources of this kind.
    Kept,
}

impl SkipReason {
    /// Whether dependents may proceed as if the step succeeded.
    pub fn satisfies_dependents(self) -> bool {
        matches!(self, SkipReason::AlreadySatisfied)
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SkipReason::AlreadySatisfied => "already satisfied",
            SkipReason::PlanAborted => "plan aborted",
            SkipReason::PlanTimeout => "plan timeout",
            SkipReason::DependencyNotSatisfied => "dependency not satisfied",
            SkipReason::Kept => "kept",
        };
        f.write_str(label)
    }
}

/// Immutable record of one step's execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step: String,
    pub state: StepState,
    /// Postcondition polls performed.
    pub attempts: u32,
    #[serde(rename = "duration_ms", with = "duration::millis")]
    pub duration: Duration,
    /// Failure policy the step declared.
    pub policy: OnFailure,
    /// How a failure was resolved (`prompt` policies resolve to abort or continue).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<FailureDecision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_observed: Option<ReadinessState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl StepOutcome {
    pub fn succeeded(step: impl Into<String>, policy: OnFailure, attempts: u32, duration: Duration) -> Self {
        Self {
            step: step.into(),
            state: StepState::Success,
            attempts,
            duration,
            policy,
            decision: None,
            failure: None,
            skip_reason: None,
            last_observed: Some(ReadinessState::Ready),
            detail: None,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(
        step: impl Into<String>,
        policy: OnFailure,
        kind: FailureKind,
        attempts: u32,
        duration: Duration,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            step: step.into(),
            state: StepState::Failure,
            attempts,
            duration,
            policy,
            decision: None,
            failure: Some(kind),
            skip_reason: None,
            last_observed: None,
            detail: Some(detail.into()),
            finished_at: Utc::now(),
        }
    }

    pub fn skipped(step: impl Into<String>, policy: OnFailure, reason: SkipReason, duration: Duration) -> Self {
        Self {
            step: step.into(),
            state: StepState::Skipped,
            attempts: 0,
            duration,
            policy,
            decision: None,
            failure: None,
            skip_reason: Some(reason),
            last_observed: None,
            detail: None,
            finished_at: Utc::now(),
        }
    }

    pub fn with_observed(mut self, observed: Option<ReadinessState>) -> Self {
        self.last_observed = observed;
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Attach the resolved failure decision; ignored for non-failures.
    pub fn with_decision(mut self, decision: FailureDecision) -> Self {
        if self.state == StepState::Failure {
            self.decision = Some(decision);
        }
        self
    }

    pub fn is_success(&self) -> bool {
        self.state == StepState::Success
    }

    pub fn is_failure(&self) -> bool {
        self.state == StepState::Failure
    }

    pub fn is_skipped(&self) -> bool {
        self.state == StepState::Skipped
    }

    /// Failure that stopped (or would have stopped) the plan.
    pub fn is_abort_class(&self) -> bool {
        self.is_failure()
            && (self.decision == Some(FailureDecision::Abort) || self.failure.is_some_and(FailureKind::always_aborts))
    }

    /// Whether steps depending on this one may run.
    pub fn satisfies_dependents(&self) -> bool {
        match self.state {
            StepState::Success => true,
            StepState::Failure => false,
            StepState::Skipped => self.skip_reason.is_some_and(SkipReason::satisfies_dependents),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_only_applies_to_failures() {
        let success = StepOutcome::succeeded("a", OnFailure::Abort, 1, Duration::ZERO).with_decision(FailureDecision::Abort);
        assert_eq!(success.decision, None);
        assert!(!success.is_abort_class());

        let failure = StepOutcome::failed("b", OnFailure::Prompt, FailureKind::ActionFailed, 0, Duration::ZERO, "boom")
            .with_decision(FailureDecision::Continue);
        assert!(!failure.is_abort_class());
    }

    #[test]
    fn unknown_precondition_is_abort_class_even_when_continuing() {
        let failure = StepOutcome::failed("c", OnFailure::Continue, FailureKind::PreconditionUnknown, 0, Duration::ZERO, "kubectl missing")
            .with_decision(FailureDecision::Continue);
        assert!(failure.is_abort_class());
    }

    #[test]
    fn only_satisfied_skips_unblock_dependents() {
        let satisfied = StepOutcome::skipped("a", OnFailure::Abort, SkipReason::AlreadySatisfied, Duration::ZERO);
        let kept = StepOutcome::skipped("b", OnFailure::Abort, SkipReason::Kept, Duration::ZERO);
        assert!(satisfied.satisfies_dependents());
        assert!(!kept.satisfies_dependents());
    }

    #[test]
    fn serializes_duration_in_millis() {
        let outcome = StepOutcome::succeeded("ns", OnFailure::Abort, 2, Duration::from_millis(1250));
        let value = serde_json::to_value(&outcome).expect("json");
        assert_eq!(value["duration_ms"], 1250);
        assert_eq!(value["state"], "success");
        assert!(value.get("failure").is_none());
    }
}
