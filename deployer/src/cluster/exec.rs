//! Command execution inside running workload instances

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cluster::api::{ClusterApi, InstanceInfo};
use crate::cluster::readiness::ReadinessPoller;
use crate::errors::DeployerError;
use crate::output::{spawn_line_reader, OutputSink};
use crate::retry::{retry, RetryError, RetryPolicy};

/// Picks the one instance commands are run in
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceSelector {
    /// Instances carrying label `key=value`
    Label { key: String, value: String },

    /// Instances whose name starts with the prefix
    NamePrefix(String),
}

impl InstanceSelector {
    pub fn label(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Label {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn name_prefix(prefix: impl Into<String>) -> Self {
        Self::NamePrefix(prefix.into())
    }

    pub fn matches(&self, instance: &InstanceInfo) -> bool {
        match self {
            InstanceSelector::Label { key, value } => instance.labels.get(key) == Some(value),
            InstanceSelector::NamePrefix(prefix) => instance.name.starts_with(prefix.as_str()),
        }
    }
}

impl fmt::Display for InstanceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceSelector::Label { key, value } => write!(f, "label {}={}", key, value),
            InstanceSelector::NamePrefix(prefix) => write!(f, "name prefix {}", prefix),
        }
    }
}

/// Runs command sequences over exec channels, re-opening refused channels
pub struct CommandExecutor {
    cluster: Arc<dyn ClusterApi>,
    poller: ReadinessPoller,
    policy: RetryPolicy,
    output: Option<Arc<dyn OutputSink>>,
}

impl CommandExecutor {
    /// Create an executor; commands run in the poller's namespace
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        poller: ReadinessPoller,
        policy: RetryPolicy,
        output: Option<Arc<dyn OutputSink>>,
    ) -> Self {
        Self {
            cluster,
            poller,
            policy,
            output,
        }
    }

    fn namespace(&self) -> &str {
        self.poller.namespace()
    }

    /// Resolve `selector` to exactly one instance name
    pub async fn resolve_instance(&self, selector: &InstanceSelector) -> Result<String, DeployerError> {
        let instances = self.cluster.list_instances(self.namespace()).await?;
        let mut matching: Vec<String> = instances
            .into_iter()
            .filter(|instance| selector.matches(instance))
            .map(|instance| instance.name)
            .collect();

        match matching.len() {
            0 => Err(DeployerError::InstanceNotFound {
                namespace: self.namespace().to_string(),
                selector: selector.to_string(),
            }),
            1 => Ok(matching.remove(0)),
            _ => {
                matching.sort();
                Err(DeployerError::AmbiguousInstance {
                    selector: selector.to_string(),
                    candidates: matching,
                })
            }
        }
    }

    /// Run `commands` in order inside `container` of the selected instance
    ///
    /// Waits for `workload` to be ready first. The whole sequence is retried
    /// when a channel cannot be established. Returns the number of attempts.
    #[allow(clippy::too_many_arguments)]
    pub async fn execute<S, F>(
        &self,
        workload: &str,
        selector: &InstanceSelector,
        container: &str,
        commands: &[Vec<String>],
        timeout: Duration,
        sleep_fn: S,
        cancel: &CancellationToken,
    ) -> Result<u32, DeployerError>
    where
        S: Fn(Duration) -> F,
        F: Future<Output = ()>,
    {
        self.poller
            .ensure_ready(workload, timeout, &sleep_fn, cancel)
            .await?;

        let instance = self.resolve_instance(selector).await?;
        info!(
            "Running {} command(s) in {}/{} [{}]",
            commands.len(),
            self.namespace(),
            instance,
            container
        );

        let instance = instance.as_str();
        let result = retry(
            &self.policy,
            &sleep_fn,
            cancel,
            |e: &DeployerError| e.is_channel_not_established(),
            |attempt| async move {
                if attempt > 1 {
                    info!("Re-opening exec channel to {} (attempt {})", instance, attempt);
                }
                self.run_sequence(instance, container, commands).await
            },
        )
        .await;

        match result {
            Ok(((), attempts)) => Ok(attempts),
            Err(RetryError::Exhausted { last, attempts }) => {
                warn!(
                    "Giving up on {} after {} attempt(s): {}",
                    instance, attempts, last
                );
                Err(last)
            }
            Err(RetryError::Fatal { error, .. }) => Err(error),
            Err(RetryError::Cancelled { .. }) => Err(DeployerError::Cancelled),
        }
    }

    async fn run_sequence(
        &self,
        instance: &str,
        container: &str,
        commands: &[Vec<String>],
    ) -> Result<(), DeployerError> {
        for command in commands {
            debug!("exec {}: {}", instance, command.join(" "));
            let session = self
                .cluster
                .exec(self.namespace(), instance, container, command)
                .await?;

            let readers: Vec<_> = [session.stdout, session.stderr]
                .into_iter()
                .flatten()
                .map(|stream| spawn_line_reader(stream, instance.to_string(), self.output.clone()))
                .collect();

            let exit = session.completion.await?;
            for reader in readers {
                reader
                    .await
                    .map_err(|e| DeployerError::Internal(format!("Output reader failed: {}", e)))??;
            }

            if !exit.success {
                warn!(
                    "Command `{}` in {} did not succeed: {}",
                    command.join(" "),
                    instance,
                    exit.message.unwrap_or_default()
                );
            }
        }
        Ok(())
    }
}
