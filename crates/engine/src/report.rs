//! Rendering of run reports for people and machines. No I/O happens here.

use std::{fmt::Write as _, str::FromStr, time::Duration};

use serde_json::json;
use stagehand_types::{FailureDecision, RunReport, SkipReason, StepOutcome, StepState};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Human,
    Json,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown report format '{0}'; expected human or json")]
pub struct UnknownReportFormat(pub String);

impl FromStr for ReportFormat {
    type Err = UnknownReportFormat;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "human" | "text" => Ok(ReportFormat::Human),
            "json" => Ok(ReportFormat::Json),
            other => Err(UnknownReportFormat(other.to_string())),
        }
    }
}

pub struct Reporter;

impl Reporter {
    pub fn render(report: &RunReport, format: ReportFormat) -> String {
        match format {
            ReportFormat::Human => render_human(report),
            ReportFormat::Json => serde_json::to_string_pretty(report)
                .unwrap_or_else(|error| json!({ "plan": report.plan, "error": error.to_string() }).to_string()),
        }
    }
}

fn render_human(report: &RunReport) -> String {
    let counts = report.counts();
    let mut out = String::new();

    let _ = write!(out, "plan {}", report.plan);
    if let Some(environment) = report.environment {
        let _ = write!(out, " ({environment})");
    }
    let _ = write!(out, ": {}", report.status);
    if let Some(elapsed) = report.elapsed_ms() {
        let _ = write!(out, " in {}", format_duration(Duration::from_millis(elapsed.max(0) as u64)));
    }
    out.push('\n');

    let _ = writeln!(
        out,
        "  {} succeeded, {} failed, {} warned, {} skipped",
        counts.succeeded, counts.failed, counts.warned, counts.skipped
    );
    let _ = writeln!(out, "  health {:.0}%", report.health_percentage());

    for outcome in report.outcomes.iter().filter(|outcome| outcome.is_failure()) {
        let _ = writeln!(out, "  {}", render_step_line(outcome));
    }

    if let Some(cause) = &report.aborted_by {
        let remaining = report
            .outcomes
            .iter()
            .filter(|outcome| matches!(outcome.skip_reason, Some(SkipReason::PlanAborted | SkipReason::PlanTimeout)))
            .count();
        let noun = if remaining == 1 { "step" } else { "steps" };
        let _ = writeln!(out, "  aborted by {cause}; {remaining} remaining {noun} skipped");
    }

    out
}

/// One line describing a finished step, as streamed while the plan runs.
pub fn render_step_line(outcome: &StepOutcome) -> String {
    let duration = format_duration(outcome.duration);
    match outcome.state {
        StepState::Success => {
            let polls = if outcome.attempts == 1 { "poll" } else { "polls" };
            format!("[ok]   {} ({} {polls}, {duration})", outcome.step, outcome.attempts)
        }
        StepState::Skipped => {
            let reason = outcome.skip_reason.map(|reason| reason.to_string()).unwrap_or_default();
            format!("[skip] {}: {reason}", outcome.step)
        }
        StepState::Failure => {
            let tag = if outcome.is_abort_class() { "[FAIL]" } else { "[warn]" };
            let kind = outcome.failure.map(|kind| kind.to_string()).unwrap_or_else(|| "failed".to_string());
            let mut line = format!("{tag} {}: {kind} after {} polls, {duration}", outcome.step, outcome.attempts);
            if outcome.decision == Some(FailureDecision::Continue) {
                line.push_str(", continuing");
            }
            if let Some(detail) = &outcome.detail {
                let _ = write!(line, " ({})", first_line(detail));
            }
            line
        }
    }
}

/// The single streamed line that stands in for every step skipped after the plan halted.
pub fn render_halted_line(cause: &str, remaining: usize) -> String {
    let noun = if remaining == 1 { "step" } else { "steps" };
    format!("[skip] {remaining} remaining {noun}: aborted by {cause}")
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default().trim()
}

fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1_000 {
        format!("{millis}ms")
    } else if millis < 60_000 {
        format!("{:.1}s", duration.as_secs_f64())
    } else {
        let seconds = duration.as_secs();
        format!("{}m{:02}s", seconds / 60, seconds % 60)
    }
}
