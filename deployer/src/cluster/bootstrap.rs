//! Cluster client bootstrap
//!
//! Fetches the admin kubeconfig of the managed cluster, keeps it in the temp
//! directory for the chart installer and builds a `kube::Client` from it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use secrecy::{ExposeSecret, SecretString};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::errors::DeployerError;
use crate::filesys::file::File;

/// Source of cluster admin credentials
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Kubeconfig text granting admin access to the cluster
    async fn fetch_admin_kubeconfig(
        &self,
        resource_group: &str,
        cluster_name: &str,
    ) -> Result<SecretString, DeployerError>;
}

/// A connected cluster client
#[derive(Clone)]
pub struct ClusterHandle {
    pub client: Client,

    /// Kubeconfig the client was built from, passed to the chart installer
    pub kubeconfig_path: PathBuf,
}

pub struct ClusterBootstrapper {
    source: Arc<dyn CredentialSource>,
    cluster_name: String,
    kubeconfig_file: File,
}

impl ClusterBootstrapper {
    pub fn new(
        source: Arc<dyn CredentialSource>,
        cluster_name: impl Into<String>,
        kubeconfig_file: File,
    ) -> Self {
        Self {
            source,
            cluster_name: cluster_name.into(),
            kubeconfig_file,
        }
    }

    /// Fetch credentials and connect to the cluster
    pub async fn get_client(
        &self,
        resource_group: &str,
        cancel: &CancellationToken,
    ) -> Result<ClusterHandle, DeployerError> {
        let path = self.write_kubeconfig(resource_group, cancel).await?;
        let config = load_config(&path).await?;
        let client = Client::try_from(config)?;

        info!("Connected to cluster {}", self.cluster_name);
        Ok(ClusterHandle {
            client,
            kubeconfig_path: path,
        })
    }

    /// Fetch the admin kubeconfig and store it owner-readable only
    pub async fn write_kubeconfig(
        &self,
        resource_group: &str,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, DeployerError> {
        info!(
            "Fetching admin credentials for cluster {} in {}",
            self.cluster_name, resource_group
        );

        let kubeconfig = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DeployerError::Cancelled),
            result = self.source.fetch_admin_kubeconfig(resource_group, &self.cluster_name) => result?,
        };

        self.kubeconfig_file
            .write_atomic(kubeconfig.expose_secret().as_bytes())
            .await?;
        self.kubeconfig_file.set_permissions_600().await?;

        Ok(self.kubeconfig_file.path().to_path_buf())
    }
}

/// Load a client configuration from a kubeconfig file, using its current context
pub async fn load_config(path: &Path) -> Result<Config, DeployerError> {
    let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
        DeployerError::Kubeconfig(format!("Failed to read {}: {}", path.display(), e))
    })?;

    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| DeployerError::Kubeconfig(format!("Failed to load {}: {}", path.display(), e)))
}
