//! Values document synchronization
//!
//! The values document lives in the remote store and is mirrored to the
//! local chart directory before every install. The remote copy is written
//! first; the local copy is only produced once the upload succeeded.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::DeployerError;
use crate::filesys::file::File;
use crate::storage::blob::DocumentStore;
use crate::storage::settings::ManagedIdentitySettings;
use crate::utils::sha256_hash;
use crate::values::document::{ConfigurationDocument, ContainerAccess};
use crate::values::keys::{is_truthy, SettingKey, SettingsMap};
use crate::values::mapper::{apply_overlay, to_document, to_settings};

/// Default container holding the values document
pub const VALUES_CONTAINER: &str = "configuration";

/// Name of the values document in the remote store
pub const VALUES_BLOB_NAME: &str = "aksValues.yaml";

/// Resources created by provisioning that the first publish records
#[derive(Debug, Clone)]
pub struct ProvisionedResources {
    pub resource_group: String,
    pub storage_account_name: String,
    pub identity: ManagedIdentitySettings,

    /// Key vault holding the storage key; required for cross-subscription deployments
    pub key_vault_url: Option<String>,
    pub storage_key_secret_name: String,
}

impl ProvisionedResources {
    /// Container access variant for the deployment mode
    pub fn container_access(&self, cross_subscription: bool) -> Result<ContainerAccess, DeployerError> {
        if !cross_subscription {
            return Ok(ContainerAccess::ManagedIdentity {
                account_name: self.storage_account_name.clone(),
                resource_group: self.resource_group.clone(),
            });
        }

        let key_vault_url = self.key_vault_url.clone().ok_or_else(|| {
            DeployerError::ConfigError(
                "A key vault is required for cross-subscription deployments".to_string(),
            )
        })?;

        Ok(ContainerAccess::KeyVault {
            account_name: self.storage_account_name.clone(),
            key_vault_url,
            secret_name: self.storage_key_secret_name.clone(),
        })
    }
}

/// Keeps the remote values document and its local copy in step
pub struct ValuesSynchronizer {
    store: Arc<dyn DocumentStore>,
    container: String,
    local_file: File,
}

impl ValuesSynchronizer {
    pub fn new(store: Arc<dyn DocumentStore>, container: impl Into<String>, local_file: File) -> Self {
        Self {
            store,
            container: container.into(),
            local_file,
        }
    }

    /// Local copy consumed by the chart installer
    pub fn local_file(&self) -> &File {
        &self.local_file
    }

    /// Render the first values document from the packaged template
    pub async fn publish(
        &self,
        template: ConfigurationDocument,
        settings: &SettingsMap,
        provisioned: &ProvisionedResources,
        cancel: &CancellationToken,
    ) -> Result<ConfigurationDocument, DeployerError> {
        let mut settings = settings.clone();
        settings.insert(
            SettingKey::ManagedIdentityClientId.to_string(),
            provisioned.identity.client_id.clone(),
        );

        let mut document = to_document(&settings, template)?;
        document.config.resource_group = Some(provisioned.resource_group.clone());
        document.identity.name = Some(provisioned.identity.name.clone());
        document.identity.resource_id = Some(provisioned.identity.resource_id.clone());

        let cross_subscription = settings
            .get(SettingKey::CrossSubscriptionAKSDeployment.as_str())
            .map(|v| is_truthy(v))
            .unwrap_or(false);
        document.bind_container_access(&provisioned.container_access(cross_subscription)?);

        info!(
            "Publishing values document for resource group {}",
            provisioned.resource_group
        );
        self.commit(&document, cancel).await?;
        Ok(document)
    }

    /// Re-apply a settings overlay to the stored values document
    pub async fn refresh(
        &self,
        overlay: &SettingsMap,
        cancel: &CancellationToken,
    ) -> Result<ConfigurationDocument, DeployerError> {
        let document = self.download(cancel).await?;
        let document = apply_overlay(overlay, document)?;

        info!("Refreshing values document with {} setting(s)", overlay.len());
        self.commit(&document, cancel).await?;
        Ok(document)
    }

    /// Settings currently recorded in the stored values document
    pub async fn current_settings(
        &self,
        cancel: &CancellationToken,
    ) -> Result<SettingsMap, DeployerError> {
        let document = self.download(cancel).await?;
        Ok(to_settings(&document))
    }

    async fn download(&self, cancel: &CancellationToken) -> Result<ConfigurationDocument, DeployerError> {
        debug!("Downloading {}/{}", self.container, VALUES_BLOB_NAME);

        let content = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DeployerError::Cancelled),
            result = self.store.read(&self.container, VALUES_BLOB_NAME) => result,
        }
        .map_err(|e| match e {
            DeployerError::Cancelled | DeployerError::SyncFailure(_) => e,
            other => DeployerError::SyncFailure(format!(
                "download of {}/{} failed: {}",
                self.container, VALUES_BLOB_NAME, other
            )),
        })?;

        match content {
            Some(text) => ConfigurationDocument::from_yaml(&text),
            None => Err(DeployerError::DocumentNotFound {
                container: self.container.clone(),
                name: VALUES_BLOB_NAME.to_string(),
            }),
        }
    }

    async fn commit(
        &self,
        document: &ConfigurationDocument,
        cancel: &CancellationToken,
    ) -> Result<(), DeployerError> {
        let content = document.to_yaml()?;

        let uploaded = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DeployerError::Cancelled),
            result = self.store.write(&self.container, VALUES_BLOB_NAME, &content) => result,
        };

        if let Err(e) = uploaded {
            if let Err(delete_err) = self.local_file.delete().await {
                warn!(
                    "Failed to remove stale values file {}: {}",
                    self.local_file.path().display(),
                    delete_err
                );
            }
            return Err(match e {
                DeployerError::Cancelled | DeployerError::SyncFailure(_) => e,
                other => DeployerError::SyncFailure(format!(
                    "upload of {}/{} failed: {}",
                    self.container, VALUES_BLOB_NAME, other
                )),
            });
        }

        self.local_file.write_atomic(content.as_bytes()).await?;
        info!(
            "Values document synchronized to {} (sha256 {})",
            self.local_file.path().display(),
            sha256_hash(content.as_bytes())
        );
        Ok(())
    }
}
