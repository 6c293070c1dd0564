//! Cluster control API
//!
//! The rest of the crate talks to the cluster through [`ClusterApi`];
//! [`KubeCluster`] is the implementation backed by a `kube::Client`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams, ListParams};
use kube::Client;
use tokio::io::AsyncRead;
use tracing::debug;

use crate::errors::DeployerError;

/// Boxed output stream of an exec channel
pub type ExecStream = Box<dyn AsyncRead + Send + Unpin>;

/// A running instance (pod) of a workload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceInfo {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

/// Replica status of a workload (deployment)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadStatus {
    pub name: String,
    pub ready_replicas: i32,
}

impl WorkloadStatus {
    pub fn is_ready(&self) -> bool {
        self.ready_replicas >= 1
    }
}

/// How a command run over an exec channel ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecExit {
    pub success: bool,
    pub message: Option<String>,
}

impl ExecExit {
    pub fn success() -> Self {
        Self {
            success: true,
            message: None,
        }
    }
}

/// An open exec channel
///
/// Both streams must be drained for `completion` to resolve.
pub struct ExecSession {
    pub stdout: Option<ExecStream>,
    pub stderr: Option<ExecStream>,
    pub completion: BoxFuture<'static, Result<ExecExit, DeployerError>>,
}

/// Operations the deployer needs from the cluster
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// List running instances in `namespace`
    async fn list_instances(&self, namespace: &str) -> Result<Vec<InstanceInfo>, DeployerError>;

    /// List workloads and their ready replica counts in `namespace`
    async fn list_workloads(&self, namespace: &str) -> Result<Vec<WorkloadStatus>, DeployerError>;

    /// Open an exec channel running `command` in one container of an instance
    async fn exec(
        &self,
        namespace: &str,
        instance: &str,
        container: &str,
        command: &[String],
    ) -> Result<ExecSession, DeployerError>;
}

/// [`ClusterApi`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn list_instances(&self, namespace: &str) -> Result<Vec<InstanceInfo>, DeployerError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = pods.list(&ListParams::default()).await?;

        Ok(list
            .items
            .into_iter()
            .filter_map(|pod| {
                let name = pod.metadata.name?;
                Some(InstanceInfo {
                    name,
                    labels: pod.metadata.labels.unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn list_workloads(&self, namespace: &str) -> Result<Vec<WorkloadStatus>, DeployerError> {
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let list = deployments.list(&ListParams::default()).await?;

        Ok(list
            .items
            .into_iter()
            .filter_map(|deployment| {
                let name = deployment.metadata.name?;
                let ready_replicas = deployment
                    .status
                    .and_then(|status| status.ready_replicas)
                    .unwrap_or(0);
                Some(WorkloadStatus {
                    name,
                    ready_replicas,
                })
            })
            .collect())
    }

    async fn exec(
        &self,
        namespace: &str,
        instance: &str,
        container: &str,
        command: &[String],
    ) -> Result<ExecSession, DeployerError> {
        debug!("exec {}/{} [{}]: {:?}", namespace, instance, container, command);

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = AttachParams::default()
            .container(container)
            .stdin(false)
            .stdout(true)
            .stderr(true);

        let mut attached = pods.exec(instance, command.to_vec(), &params).await?;

        let stdout = attached
            .stdout()
            .map(|stream| Box::new(stream) as ExecStream);
        let stderr = attached
            .stderr()
            .map(|stream| Box::new(stream) as ExecStream);
        let status = attached.take_status();

        let completion = async move {
            let status = match status {
                Some(status) => status.await,
                None => None,
            };
            attached
                .join()
                .await
                .map_err(|e| DeployerError::Internal(format!("Exec stream failed: {}", e)))?;

            Ok(match status {
                Some(status) if status.status.as_deref() != Some("Success") => ExecExit {
                    success: false,
                    message: status.message,
                },
                _ => ExecExit::success(),
            })
        }
        .boxed();

        Ok(ExecSession {
            stdout,
            stderr,
            completion,
        })
    }
}
