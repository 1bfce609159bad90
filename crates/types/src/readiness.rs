//! Observed readiness of an external resource.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Condition a probe reports for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessState {
    /// The resource does not exist (or its kind is not supported by the probe).
    Absent,
    /// The resource exists but is still converging.
    Pending,
    /// The resource exists and is healthy.
    Ready,
    /// The resource is definitely broken; waiting longer will not help.
    Failed,
}

impl ReadinessState {
    pub fn is_ready(self) -> bool {
        matches!(self, ReadinessState::Ready)
    }

    pub fn is_failed(self) -> bool {
        matches!(self, ReadinessState::Failed)
    }
}

impl fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ReadinessState::Absent => "absent",
            ReadinessState::Pending => "pending",
            ReadinessState::Ready => "ready",
            ReadinessState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// What a check expects to observe.
///
/// Provisioning waits for resources to become `Present`; teardown waits for them to be `Gone`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expectation {
    #[default]
    Present,
    Gone,
}

impl Expectation {
    /// Translate an observed state into readiness relative to this expectation.
    ///
    /// For `Gone`, an absent resource is the goal and anything still present is progress in flight.
    pub fn evaluate(self, observed: ReadinessState) -> ReadinessState {
        match self {
            Expectation::Present => observed,
            Expectation::Gone => match observed {
                ReadinessState::Absent => ReadinessState::Ready,
                ReadinessState::Pending | ReadinessState::Ready | ReadinessState::Failed => ReadinessState::Pending,
            },
        }
    }
}
