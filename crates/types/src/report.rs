//! Aggregated record of one plan execution.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Environment, StepOutcome, StepState};

/// Process exit code for a fully successful run.
pub const EXIT_SUCCESS: i32 = 0;
/// Process exit code when an abort-class failure stopped the plan.
pub const EXIT_ABORTED: i32 = 1;
/// Process exit code when every failure was continue-class.
pub const EXIT_PARTIAL: i32 = 2;

/// Overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    Failure,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failure => "failure",
        };
        f.write_str(label)
    }
}

/// Outcome tallies used by summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub succeeded: usize,
    /// Abort-class failures.
    pub failed: usize,
    /// Continue-class failures.
    pub warned: usize,
    pub skipped: usize,
}

impl OutcomeCounts {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.warned + self.skipped
    }

    pub fn executed(&self) -> usize {
        self.succeeded + self.failed + self.warned
    }
}

/// Every step outcome of a single plan execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub plan: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<Environment>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    /// Step (or `plan timeout`) that stopped the run early.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted_by: Option<String>,
    pub outcomes: Vec<StepOutcome>,
}

impl RunReport {
    /// Open a report for a plan that is about to start.
    pub fn begin(plan: impl Into<String>, environment: Option<Environment>) -> Self {
        Self {
            plan: plan.into(),
            environment,
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Running,
            aborted_by: None,
            outcomes: Vec::new(),
        }
    }

    /// Append an outcome to the run log.
    pub fn record(&mut self, outcome: StepOutcome) {
        self.outcomes.push(outcome);
    }

    /// Remember the first reason the run stopped early.
    pub fn mark_aborted(&mut self, cause: impl Into<String>) {
        if self.aborted_by.is_none() {
            self.aborted_by = Some(cause.into());
        }
    }

    /// Close the report and compute its overall status.
    pub fn finalize(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self.status = if self.aborted_by.is_none() && !self.outcomes.iter().any(StepOutcome::is_failure) {
            RunStatus::Success
        } else {
            RunStatus::Failure
        };
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    pub fn outcome(&self, step: &str) -> Option<&StepOutcome> {
        self.outcomes.iter().find(|outcome| outcome.step == step)
    }

    pub fn counts(&self) -> OutcomeCounts {
        let mut counts = OutcomeCounts::default();
        for outcome in &self.outcomes {
            match outcome.state {
                StepState::Success => counts.succeeded += 1,
                StepState::Skipped => counts.skipped += 1,
                StepState::Failure if outcome.is_abort_class() => counts.failed += 1,
                StepState::Failure => counts.warned += 1,
            }
        }
        counts
    }

    /// Successes as a percentage of steps that actually ran; 100 when nothing ran.
    pub fn health_percentage(&self) -> f64 {
        let counts = self.counts();
        if counts.executed() == 0 {
            return 100.0;
        }
        counts.succeeded as f64 * 100.0 / counts.executed() as f64
    }

    /// Wall-clock duration in milliseconds, once finalized.
    pub fn elapsed_ms(&self) -> Option<i64> {
        self.finished_at.map(|finished_at| (finished_at - self.started_at).num_milliseconds())
    }

    /// 0 on success, 1 when the run aborted, 2 when only continue-class failures occurred.
    pub fn exit_code(&self) -> i32 {
        let any_failure = self.outcomes.iter().any(StepOutcome::is_failure);
        if self.aborted_by.is_some() || self.outcomes.iter().any(StepOutcome::is_abort_class) {
            EXIT_ABORTED
        } else if any_failure {
            EXIT_PARTIAL
        } else {
            EXIT_SUCCESS
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{FailureDecision, FailureKind, OnFailure, SkipReason};

    fn continue_failure(step: &str) -> StepOutcome {
        StepOutcome::failed(step, OnFailure::Continue, FailureKind::ActionFailed, 0, Duration::ZERO, "boom")
            .with_decision(FailureDecision::Continue)
    }

    #[test]
    fn continue_failures_taint_status_but_exit_partial() {
        let mut report = RunReport::begin("teardown", None);
        report.record(continue_failure("remove-metrics-server"));
        report.record(StepOutcome::succeeded("delete-ml-pipeline", OnFailure::Abort, 1, Duration::ZERO));
        let report = report.finalize();

        assert_eq!(report.status, RunStatus::Failure);
        assert_eq!(report.exit_code(), EXIT_PARTIAL);
        assert_eq!(report.counts().warned, 1);
        assert_eq!(report.health_percentage(), 50.0);
    }

    #[test]
    fn all_skipped_run_is_successful_and_fully_healthy() {
        let mut report = RunReport::begin("data-plane", None);
        report.record(StepOutcome::skipped("ns", OnFailure::Abort, SkipReason::AlreadySatisfied, Duration::ZERO));
        let report = report.finalize();

        assert!(report.is_success());
        assert_eq!(report.exit_code(), EXIT_SUCCESS);
        assert_eq!(report.health_percentage(), 100.0);
    }

    #[test]
    fn abort_marker_without_failures_still_exits_aborted() {
        let mut report = RunReport::begin("all", None);
        report.record(StepOutcome::skipped("late", OnFailure::Abort, SkipReason::PlanTimeout, Duration::ZERO));
        report.mark_aborted("plan timeout");
        report.mark_aborted("ignored");
        let report = report.finalize();

        assert_eq!(report.aborted_by.as_deref(), Some("plan timeout"));
        assert_eq!(report.status, RunStatus::Failure);
        assert_eq!(report.exit_code(), EXIT_ABORTED);
    }
}
