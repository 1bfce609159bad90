//! HTTP endpoint probe.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, redirect::Policy};
use stagehand_types::{ReadinessState, ResourceKind, ResourceRef};
use tracing::debug;

use super::{Probe, ProbeError};

#[derive(Clone)]
pub struct HttpProbe {
    client: Client,
    accept_status: Vec<u16>,
}

impl HttpProbe {
    /// Build a probe whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .redirect(Policy::none())
            // Local ArgoCD serves a self-signed certificate.
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Self {
            client,
            accept_status: Vec::new(),
        })
    }

    /// Same client, different status allow-list.
    pub fn accepting(&self, accept_status: Vec<u16>) -> Self {
        Self {
            client: self.client.clone(),
            accept_status,
        }
    }
}

#[async_trait]
impl Probe for HttpProbe {
    fn name(&self) -> &str {
        "http"
    }

    async fn check(&self, resource: &ResourceRef) -> Result<ReadinessState, ProbeError> {
        if resource.kind != ResourceKind::Endpoint {
            return Ok(ReadinessState::Absent);
        }
        match self.client.get(&resource.name).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                debug!(url = %resource.name, status, "endpoint answered");
                Ok(if status_accepted(status, &self.accept_status) {
                    ReadinessState::Ready
                } else {
                    ReadinessState::Pending
                })
            }
            // A service still warming up may hold the first requests; the step budget decides when to give up.
            Err(error) if error.is_timeout() => Ok(ReadinessState::Pending),
            Err(error) if error.is_connect() => Ok(ReadinessState::Pending),
            Err(error) if error.is_builder() => Err(ProbeError::Unavailable(error.to_string())),
            Err(error) => Err(ProbeError::Transient(error.to_string())),
        }
    }
}

/// An explicit allow-list wins; otherwise any 2xx or 3xx status counts.
pub fn status_accepted(status: u16, accept_status: &[u16]) -> bool {
    if accept_status.is_empty() {
        (200..400).contains(&status)
    } else {
        accept_status.contains(&status)
    }
}
