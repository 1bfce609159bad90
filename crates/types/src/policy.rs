//! Retry and failure policies attached to steps.

use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration;

/// What the runner does after a step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnFailure {
    /// Stop the plan and skip every remaining step.
    #[default]
    Abort,
    /// Record the failure and keep going.
    Continue,
    /// Ask the operator; resolved from configuration when running non-interactively.
    Prompt,
}

impl fmt::Display for OnFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OnFailure::Abort => "abort",
            OnFailure::Continue => "continue",
            OnFailure::Prompt => "prompt",
        };
        f.write_str(label)
    }
}

/// Concrete decision taken for a failed step once any prompt has been resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureDecision {
    Abort,
    Continue,
}

impl fmt::Display for FailureDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureDecision::Abort => f.write_str("abort"),
            FailureDecision::Continue => f.write_str("continue"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid failure decision '{0}'; expected 'abort' or 'continue'")]
pub struct InvalidFailureDecision(pub String);

impl FromStr for FailureDecision {
    type Err = InvalidFailureDecision;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(FailureDecision::Abort),
            "continue" | "proceed" => Ok(FailureDecision::Continue),
            _ => Err(InvalidFailureDecision(raw.trim().to_string())),
        }
    }
}

/// Bounded exponential backoff used while polling a postcondition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total postcondition polls allowed, including the first.
    pub max_attempts: u32,
    /// Delay after the first unsuccessful poll.
    #[serde(with = "duration::text")]
    pub backoff: Duration,
    /// Upper bound for any single delay.
    #[serde(with = "duration::text")]
    pub max_backoff: Duration,
    /// Growth factor applied to the delay after each poll.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A single poll with no waiting.
    pub fn once() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    /// Constant delay between polls.
    pub fn fixed(max_attempts: u32, every: Duration) -> Self {
        Self {
            max_attempts,
            backoff: every,
            max_backoff: every,
            multiplier: 1.0,
        }
    }

    /// Attempt ceiling, never below one.
    pub fn attempt_limit(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay to wait after the given 1-based poll before polling again.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let multiplier = if self.multiplier.is_finite() && self.multiplier >= 1.0 {
            self.multiplier
        } else {
            1.0
        };
        let scaled_seconds = self.backoff.as_secs_f64() * multiplier.powi(exponent);
        let capped_seconds = scaled_seconds.min(self.max_backoff.max(self.backoff).as_secs_f64());
        Duration::from_secs_f64(capped_seconds.max(0.0))
    }

    /// Sum of all delays the policy can impose.
    pub fn worst_case_wait(&self) -> Duration {
        (1..self.attempt_limit()).map(|attempt| self.delay_after(attempt)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 6,
            backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
        };
        let delays: Vec<u64> = (1..=5).map(|attempt| policy.delay_after(attempt).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 5, 5]);
        assert_eq!(policy.worst_case_wait(), Duration::from_secs(17));
    }

    #[test]
    fn zero_attempts_still_polls_once() {
        let policy = RetryPolicy::fixed(0, Duration::from_millis(10));
        assert_eq!(policy.attempt_limit(), 1);
        assert_eq!(policy.worst_case_wait(), Duration::ZERO);
    }

    #[test]
    fn deserializes_duration_text() {
        let policy: RetryPolicy = serde_yaml::from_str("max_attempts: 4\nbackoff: 500ms\nmax_backoff: 2s\n").expect("policy");
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.backoff, Duration::from_millis(500));
        assert_eq!(policy.max_backoff, Duration::from_secs(2));
        assert_eq!(policy.multiplier, 2.0);
    }

    #[test]
    fn parses_failure_decisions() {
        assert_eq!("Continue".parse::<FailureDecision>(), Ok(FailureDecision::Continue));
        assert!("maybe".parse::<FailureDecision>().is_err());
    }
}
