//! Workload readiness polling

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cluster::api::ClusterApi;
use crate::errors::DeployerError;
use crate::retry::{retry, RetryError, RetryPolicy};

/// Workload hosting the workflow engine
pub const CROMWELL_WORKLOAD: &str = "cromwell";

/// Time the workflow engine is given to start
pub const CROMWELL_STARTUP_TIMEOUT: Duration = Duration::from_secs(180);

/// Result of polling a workload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessOutcome {
    Ready { attempts: u32 },
    TimedOut { attempts: u32 },
}

enum NotReady {
    Missing,
    NoReplicas,
    Query(DeployerError),
}

impl fmt::Display for NotReady {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotReady::Missing => write!(f, "workload not found"),
            NotReady::NoReplicas => write!(f, "no ready replicas"),
            NotReady::Query(e) => write!(f, "query failed: {}", e),
        }
    }
}

/// Polls the cluster until a workload has a ready replica
pub struct ReadinessPoller {
    cluster: Arc<dyn ClusterApi>,
    namespace: String,
    policy: RetryPolicy,
}

impl ReadinessPoller {
    pub fn new(cluster: Arc<dyn ClusterApi>, namespace: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            cluster,
            namespace: namespace.into(),
            policy,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Poll `workload` until ready or the policy is exhausted
    ///
    /// `timeout` is reported only; the policy alone bounds the wait.
    pub async fn wait_for<S, F>(
        &self,
        workload: &str,
        timeout: Duration,
        sleep_fn: S,
        cancel: &CancellationToken,
    ) -> Result<ReadinessOutcome, DeployerError>
    where
        S: Fn(Duration) -> F,
        F: Future<Output = ()>,
    {
        let budget = self.policy.budget();
        if budget > timeout {
            warn!(
                "Retry budget {:?} for {} exceeds the requested timeout {:?}",
                budget, workload, timeout
            );
        }
        info!(
            "Waiting for {} in namespace {} (timeout {:?}, {} attempts every {:?})",
            workload, self.namespace, timeout, self.policy.max_attempts, self.policy.delay
        );

        let max_attempts = self.policy.max_attempts;
        let result = retry(
            &self.policy,
            sleep_fn,
            cancel,
            |_: &NotReady| true,
            |attempt| async move {
                let outcome = self.probe(workload).await;
                if let Err(reason) = &outcome {
                    debug!(
                        "{} not ready on attempt {}/{}: {}",
                        workload, attempt, max_attempts, reason
                    );
                }
                outcome
            },
        )
        .await;

        match result {
            Ok(((), attempts)) => {
                info!("{} is ready after {} attempt(s)", workload, attempts);
                Ok(ReadinessOutcome::Ready { attempts })
            }
            Err(RetryError::Cancelled { .. }) => Err(DeployerError::Cancelled),
            Err(RetryError::Exhausted { last, attempts })
            | Err(RetryError::Fatal {
                error: last,
                attempts,
            }) => {
                warn!(
                    "{} did not become ready after {} attempt(s): {}",
                    workload, attempts, last
                );
                Ok(ReadinessOutcome::TimedOut { attempts })
            }
        }
    }

    /// Like [`wait_for`](Self::wait_for), failing with `WorkloadStartupTimeout`
    pub async fn ensure_ready<S, F>(
        &self,
        workload: &str,
        timeout: Duration,
        sleep_fn: S,
        cancel: &CancellationToken,
    ) -> Result<u32, DeployerError>
    where
        S: Fn(Duration) -> F,
        F: Future<Output = ()>,
    {
        match self.wait_for(workload, timeout, sleep_fn, cancel).await? {
            ReadinessOutcome::Ready { attempts } => Ok(attempts),
            ReadinessOutcome::TimedOut { .. } => Err(DeployerError::WorkloadStartupTimeout {
                workload: workload.to_string(),
            }),
        }
    }

    /// Wait for the workflow engine to start
    pub async fn wait_for_cromwell<S, F>(
        &self,
        sleep_fn: S,
        cancel: &CancellationToken,
    ) -> Result<(), DeployerError>
    where
        S: Fn(Duration) -> F,
        F: Future<Output = ()>,
    {
        self.ensure_ready(CROMWELL_WORKLOAD, CROMWELL_STARTUP_TIMEOUT, sleep_fn, cancel)
            .await
            .map(|_| ())
    }

    async fn probe(&self, workload: &str) -> Result<(), NotReady> {
        let workloads = self
            .cluster
            .list_workloads(&self.namespace)
            .await
            .map_err(NotReady::Query)?;

        match workloads
            .iter()
            .find(|w| w.name.eq_ignore_ascii_case(workload))
        {
            Some(status) if status.is_ready() => Ok(()),
            Some(_) => Err(NotReady::NoReplicas),
            None => Err(NotReady::Missing),
        }
    }
}
