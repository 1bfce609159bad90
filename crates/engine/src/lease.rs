//! Background processes owned by a run.
//!
//! A port-forward started by one step must outlive that step but not the run. Actions register
//! the process in the run's [`LeaseSet`]; the runner releases every lease when `execute`
//! returns, whichever way it returns.

use async_trait::async_trait;
use tokio::{process::Child, sync::Mutex};
use tracing::{debug, warn};

/// A releasable external resource.
#[async_trait]
pub trait Lease: Send {
    /// Human-readable label, usually the redacted command line.
    fn label(&self) -> &str;

    /// Stop the resource. Called exactly once.
    async fn release(self: Box<Self>) -> anyhow::Result<()>;
}

/// Lease over a spawned child process.
pub struct ChildLease {
    label: String,
    child: Child,
}

impl ChildLease {
    pub fn new(label: impl Into<String>, child: Child) -> Self {
        Self {
            label: label.into(),
            child,
        }
    }
}

#[async_trait]
impl Lease for ChildLease {
    fn label(&self) -> &str {
        &self.label
    }

    async fn release(mut self: Box<Self>) -> anyhow::Result<()> {
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }
        self.child.kill().await?;
        Ok(())
    }
}

/// Leases acquired during a run, released in reverse acquisition order.
#[derive(Default)]
pub struct LeaseSet {
    leases: Mutex<Vec<Box<dyn Lease>>>,
}

impl LeaseSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn hold(&self, lease: Box<dyn Lease>) {
        debug!(lease = %lease.label(), "lease acquired");
        self.leases.lock().await.push(lease);
    }

    pub async fn len(&self) -> usize {
        self.leases.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.leases.lock().await.is_empty()
    }

    /// Release every held lease; failures are logged, not returned.
    pub async fn release_all(&self) -> usize {
        let drained: Vec<Box<dyn Lease>> = std::mem::take(&mut *self.leases.lock().await);
        let released = drained.len();
        for lease in drained.into_iter().rev() {
            let label = lease.label().to_string();
            match lease.release().await {
                Ok(()) => debug!(lease = %label, "lease released"),
                Err(error) => warn!(lease = %label, %error, "failed to release lease"),
            }
        }
        released
    }
}

impl std::fmt::Debug for LeaseSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseSet").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    struct CountingLease {
        label: String,
        released: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Lease for CountingLease {
        fn label(&self) -> &str {
            &self.label
        }

        async fn release(self: Box<Self>) -> anyhow::Result<()> {
            self.released.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn release_all_drains_every_lease_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let leases = LeaseSet::new();
        for index in 0..3 {
            leases
                .hold(Box::new(CountingLease {
                    label: format!("port-forward-{index}"),
                    released: released.clone(),
                }))
                .await;
        }

        assert_eq!(leases.release_all().await, 3);
        assert_eq!(leases.release_all().await, 0);
        assert_eq!(released.load(Ordering::SeqCst), 3);
        assert!(leases.is_empty().await);
    }
}
