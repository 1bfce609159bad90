//! A probe bound to one resource and an expectation.

use std::{fmt, sync::Arc, time::Duration};

use stagehand_types::{Expectation, ReadinessState, ResourceKind, ResourceRef};

use crate::probe::{Probe, ProbeError};

#[derive(Clone)]
pub struct Check {
    probe: Arc<dyn Probe>,
    resource: ResourceRef,
    expectation: Expectation,
}

impl Check {
    /// Wait for the resource to be present and ready.
    pub fn present(probe: Arc<dyn Probe>, resource: ResourceRef) -> Self {
        Self {
            probe,
            resource,
            expectation: Expectation::Present,
        }
    }

    /// Wait for the resource to disappear.
    pub fn gone(probe: Arc<dyn Probe>, resource: ResourceRef) -> Self {
        Self {
            probe,
            resource,
            expectation: Expectation::Gone,
        }
    }

    pub fn with_expectation(probe: Arc<dyn Probe>, resource: ResourceRef, expectation: Expectation) -> Self {
        Self {
            probe,
            resource,
            expectation,
        }
    }

    pub fn resource(&self) -> &ResourceRef {
        &self.resource
    }

    pub fn expectation(&self) -> Expectation {
        self.expectation
    }

    /// Probe once, bounded by `timeout`, and judge the observation against the expectation.
    ///
    /// A probe that does not answer in time observes `Failed`, except for endpoints, which stay
    /// `Pending` until the step's retry policy or budget runs out.
    pub async fn evaluate(&self, timeout: Duration) -> Result<ReadinessState, ProbeError> {
        let observed = match tokio::time::timeout(timeout, self.probe.check(&self.resource)).await {
            Err(_) | Ok(Err(ProbeError::TimedOut(_))) if self.resource.kind == ResourceKind::Endpoint => ReadinessState::Pending,
            Err(_) | Ok(Err(ProbeError::TimedOut(_))) => ReadinessState::Failed,
            Ok(result) => result?,
        };
        Ok(self.expectation.evaluate(observed))
    }
}

impl fmt::Debug for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Check")
            .field("probe", &self.probe.name())
            .field("resource", &self.resource)
            .field("expectation", &self.expectation)
            .finish()
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.expectation {
            Expectation::Present => write!(f, "{} present", self.resource),
            Expectation::Gone => write!(f, "{} gone", self.resource),
        }
    }
}
