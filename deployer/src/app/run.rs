//! Deployment run

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::app::options::DeployerOptions;
use crate::cluster::api::{ClusterApi, KubeCluster};
use crate::cluster::bootstrap::ClusterBootstrapper;
use crate::cluster::exec::CommandExecutor;
use crate::cluster::readiness::ReadinessPoller;
use crate::errors::DeployerError;
use crate::helm::commands::ChartDeployer;
use crate::helm::installer::HelmInstaller;
use crate::output::{OutputSink, TracingSink};
use crate::provision::arm::ArmClient;
use crate::storage::blob::BlobDocumentStore;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{DeployerConfig, MANAGEMENT_TOKEN_ENV, STORAGE_TOKEN_ENV};
use crate::sync::synchronizer::{ProvisionedResources, ValuesSynchronizer};
use crate::values::document::ConfigurationDocument;
use crate::values::keys::SettingKey;

/// Run one deployment: connect, synchronize values, install, wait for startup
pub async fn run(
    mut config: DeployerConfig,
    options: DeployerOptions,
    cancel: CancellationToken,
) -> Result<(), DeployerError> {
    info!(
        "Deploying to cluster {} in resource group {} ({})",
        config.aks_cluster_name,
        config.resource_group_name,
        if config.update { "update" } else { "new deployment" }
    );

    let management_token = require_token(config.management_token.take(), MANAGEMENT_TOKEN_ENV)?;
    let storage_token = require_token(config.storage_token.take(), STORAGE_TOKEN_ENV)?;

    let output: Option<Arc<dyn OutputSink>> = if config.debug_logging {
        Some(Arc::new(TracingSink))
    } else {
        None
    };

    let arm = Arc::new(ArmClient::new(&config.subscription_id, management_token)?);
    let bootstrapper = ClusterBootstrapper::new(
        arm,
        config.aks_cluster_name.clone(),
        options.layout.kubeconfig_file(),
    );
    let handle = bootstrapper
        .get_client(&config.resource_group_name, &cancel)
        .await?;

    let store = Arc::new(BlobDocumentStore::new(
        &config.storage_account_name,
        storage_token,
    )?);
    let sync = ValuesSynchronizer::new(
        store,
        config.configuration_container_name.clone(),
        options.layout.values_file(),
    );
    sync_values(&config, &options.layout, &sync, &cancel).await?;

    let mut installer = HelmInstaller::new(&config.helm_binary_path);
    if let Some(sink) = &output {
        installer = installer.with_output(sink.clone());
    }
    let charts = ChartDeployer::new(
        installer,
        &handle.kubeconfig_path,
        options.layout.chart_dir(),
        &config.aks_coa_namespace,
    );

    if !config.update && config.install_dependencies {
        charts.deploy_dependencies().await?;
    }
    charts.deploy_chart().await?;

    let cluster: Arc<dyn ClusterApi> = Arc::new(KubeCluster::new(handle.client.clone()));
    let poller = ReadinessPoller::new(cluster.clone(), &config.aks_coa_namespace, options.readiness);
    poller.wait_for_cromwell(tokio::time::sleep, &cancel).await?;

    if let Some(post_install) = &config.post_install {
        let selector = post_install.selector()?;
        let executor = CommandExecutor::new(cluster, poller, options.exec, output);
        executor
            .execute(
                &post_install.workload,
                &selector,
                &post_install.container,
                &post_install.commands,
                Duration::from_secs(post_install.timeout_secs),
                tokio::time::sleep,
                &cancel,
            )
            .await?;
    }

    info!("Deployment complete");
    Ok(())
}

/// Publish a new values document or refresh the existing one
pub async fn sync_values(
    config: &DeployerConfig,
    layout: &StorageLayout,
    sync: &ValuesSynchronizer,
    cancel: &CancellationToken,
) -> Result<ConfigurationDocument, DeployerError> {
    if config.update {
        let current = sync.current_settings(cancel).await?;
        let version_key = SettingKey::CromwellOnAzureVersion.as_str();
        info!(
            "Updating values from version {} to {}",
            current.get(version_key).map(String::as_str).unwrap_or("unknown"),
            config
                .settings
                .get(version_key)
                .map(String::as_str)
                .unwrap_or("unchanged")
        );
        return sync.refresh(&config.settings, cancel).await;
    }

    let identity = config.managed_identity.clone().ok_or_else(|| {
        DeployerError::ConfigError("managed_identity is required for a new deployment".to_string())
    })?;

    let template_file = layout.values_template_file();
    if !template_file.exists().await {
        error!(
            "Values template not found at {}",
            template_file.path().display()
        );
        return Err(DeployerError::ConfigError(format!(
            "Missing values template {}",
            template_file.path().display()
        )));
    }
    let template = ConfigurationDocument::from_yaml(&template_file.read_string().await?)?;

    let provisioned = ProvisionedResources {
        resource_group: config.resource_group_name.clone(),
        storage_account_name: config.storage_account_name.clone(),
        identity,
        key_vault_url: config.key_vault_url.clone(),
        storage_key_secret_name: config.storage_account_key_secret_name.clone(),
    };
    sync.publish(template, &config.settings, &provisioned, cancel)
        .await
}

fn require_token(token: Option<SecretString>, env: &str) -> Result<SecretString, DeployerError> {
    token.ok_or_else(|| DeployerError::Credentials(format!("{} is not set", env)))
}
