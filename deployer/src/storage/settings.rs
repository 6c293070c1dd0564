//! Deployer configuration
//!
//! Loaded from `config.json` when present, then overlaid with `--key=value`
//! command-line arguments. Arguments of the form `--setting.<Key>=<value>`
//! go into the settings overlay.

use std::collections::HashMap;
use std::path::PathBuf;

use secrecy::SecretString;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::cluster::exec::InstanceSelector;
use crate::errors::DeployerError;
use crate::filesys::file::File;
use crate::logs::LogLevel;
use crate::values::keys::{is_truthy, SettingKey, SettingsMap};

/// Environment variable holding the ARM bearer token
pub const MANAGEMENT_TOKEN_ENV: &str = "AZURE_MANAGEMENT_TOKEN";

/// Environment variable holding the storage bearer token
pub const STORAGE_TOKEN_ENV: &str = "AZURE_STORAGE_TOKEN";

/// Prefix of command-line arguments that feed the settings overlay
const SETTING_ARG_PREFIX: &str = "setting.";

/// Deployer configuration
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeployerConfig {
    /// Subscription holding the cluster
    #[serde(default)]
    pub subscription_id: String,

    /// Resource group holding the cluster and storage account
    #[serde(default)]
    pub resource_group_name: String,

    /// Managed cluster name
    #[serde(default)]
    pub aks_cluster_name: String,

    /// Namespace the workloads run in
    #[serde(default = "default_namespace")]
    pub aks_coa_namespace: String,

    /// Path or name of the helm binary
    #[serde(default = "default_helm_binary")]
    pub helm_binary_path: PathBuf,

    /// Storage account holding the values document
    #[serde(default)]
    pub storage_account_name: String,

    /// Blob container holding the values document
    #[serde(default = "default_configuration_container")]
    pub configuration_container_name: String,

    /// Forward installer and exec output to the log
    #[serde(default)]
    pub debug_logging: bool,

    /// Mount containers with key-vault held account keys
    #[serde(default)]
    pub cross_subscription_aks_deployment: bool,

    /// Refresh an existing deployment instead of publishing a new one
    #[serde(default)]
    pub update: bool,

    /// Install aad-pod-identity and the blob CSI driver before the chart
    #[serde(default = "default_true")]
    pub install_dependencies: bool,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Also write logs to this directory
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Write logs to stdout; with `log_dir` set this can be turned off
    #[serde(default = "default_true")]
    pub log_stdout: bool,

    /// Emit JSON log lines on stdout
    #[serde(default)]
    pub json_logs: bool,

    /// Settings overlay applied to the values document
    #[serde(default)]
    pub settings: SettingsMap,

    /// Managed identity bound to the workloads (first publish only)
    #[serde(default)]
    pub managed_identity: Option<ManagedIdentitySettings>,

    /// Key vault holding the storage key (cross-subscription publish only)
    #[serde(default)]
    pub key_vault_url: Option<String>,

    /// Secret name of the storage key inside the key vault
    #[serde(default = "default_storage_key_secret_name")]
    pub storage_account_key_secret_name: String,

    /// Commands run inside a workload once the chart is installed
    #[serde(default)]
    pub post_install: Option<PostInstallCommands>,

    /// ARM bearer token, read from the environment
    #[serde(skip)]
    pub management_token: Option<SecretString>,

    /// Storage bearer token, read from the environment
    #[serde(skip)]
    pub storage_token: Option<SecretString>,
}

/// Managed identity discovered during provisioning
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManagedIdentitySettings {
    pub name: String,
    pub resource_id: String,
    pub client_id: String,
}

/// Commands executed in one instance of a workload after installation
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PostInstallCommands {
    /// Workload that must be ready before the commands run
    pub workload: String,

    /// Container inside the instance
    pub container: String,

    /// Select the instance by label, written as `key=value`
    #[serde(default)]
    pub instance_label: Option<String>,

    /// Select the instance by name prefix; defaults to `<workload>-`
    #[serde(default)]
    pub instance_prefix: Option<String>,

    /// Commands, each given as program and arguments
    pub commands: Vec<Vec<String>>,

    /// Time the workload is given to become ready
    #[serde(default = "default_post_install_timeout_secs")]
    pub timeout_secs: u64,
}

impl PostInstallCommands {
    /// Instance selector described by this block
    pub fn selector(&self) -> Result<InstanceSelector, DeployerError> {
        if let Some(label) = &self.instance_label {
            let (key, value) = label.split_once('=').ok_or_else(|| {
                DeployerError::ConfigError(format!(
                    "instance_label must be written as key=value, got {}",
                    label
                ))
            })?;
            return Ok(InstanceSelector::label(key.trim(), value.trim()));
        }

        Ok(InstanceSelector::name_prefix(
            self.instance_prefix
                .clone()
                .unwrap_or_else(|| format!("{}-", self.workload)),
        ))
    }
}

fn default_post_install_timeout_secs() -> u64 {
    180
}

fn default_true() -> bool {
    true
}

fn default_namespace() -> String {
    "coa".to_string()
}

fn default_helm_binary() -> PathBuf {
    PathBuf::from("helm")
}

fn default_configuration_container() -> String {
    "configuration".to_string()
}

fn default_storage_key_secret_name() -> String {
    "CoAStorageKey".to_string()
}

impl DeployerConfig {
    /// Load the configuration file (if any) and apply command-line overrides
    pub async fn load(
        config_file: &File,
        cli_args: &HashMap<String, String>,
    ) -> Result<Self, DeployerError> {
        let base = if config_file.exists().await {
            config_file.read_json::<Value>().await?
        } else {
            Value::Object(Map::new())
        };

        let mut config = Self::from_sources(base, cli_args)?;
        config.management_token = std::env::var(MANAGEMENT_TOKEN_ENV).ok().map(SecretString::from);
        config.storage_token = std::env::var(STORAGE_TOKEN_ENV).ok().map(SecretString::from);
        Ok(config)
    }

    /// Merge a parsed configuration file with command-line arguments
    pub fn from_sources(
        base: Value,
        cli_args: &HashMap<String, String>,
    ) -> Result<Self, DeployerError> {
        let mut root = match base {
            Value::Object(map) => map,
            _ => {
                return Err(DeployerError::ConfigError(
                    "Configuration file must contain a JSON object".to_string(),
                ))
            }
        };

        for (key, value) in cli_args {
            if let Some(setting) = key.strip_prefix(SETTING_ARG_PREFIX) {
                let settings = root
                    .entry("settings")
                    .or_insert_with(|| Value::Object(Map::new()));
                match settings {
                    Value::Object(settings) => {
                        settings.insert(setting.to_string(), Value::String(value.clone()));
                    }
                    _ => {
                        return Err(DeployerError::ConfigError(
                            "settings must be a JSON object".to_string(),
                        ))
                    }
                }
                continue;
            }

            let value = match value.as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => Value::String(value.clone()),
            };
            root.insert(key.clone(), value);
        }

        let explicit_cross_subscription = root.contains_key("cross_subscription_aks_deployment");
        let mut config: DeployerConfig = serde_json::from_value(Value::Object(root))
            .map_err(|e| DeployerError::ConfigError(format!("Invalid configuration: {}", e)))?;
        config.reconcile_cross_subscription(explicit_cross_subscription)?;
        config.validate()?;
        Ok(config)
    }

    /// Keep the cross-subscription flag and its setting in agreement
    ///
    /// The setting selects how containers are mounted when the values
    /// document is rendered, so both must describe the same deployment.
    fn reconcile_cross_subscription(&mut self, explicit: bool) -> Result<(), DeployerError> {
        let key = SettingKey::CrossSubscriptionAKSDeployment.as_str();

        match self.settings.get(key).map(|v| is_truthy(v)) {
            Some(setting) if explicit && setting != self.cross_subscription_aks_deployment => {
                Err(DeployerError::ConfigError(format!(
                    "cross_subscription_aks_deployment is {} but setting {} is {}",
                    self.cross_subscription_aks_deployment, key, setting
                )))
            }
            Some(setting) => {
                self.cross_subscription_aks_deployment = setting;
                Ok(())
            }
            None => {
                if self.cross_subscription_aks_deployment {
                    self.settings.insert(key.to_string(), "true".to_string());
                }
                Ok(())
            }
        }
    }

    /// Check that the values every run needs are present
    pub fn validate(&self) -> Result<(), DeployerError> {
        let required = [
            ("subscription_id", &self.subscription_id),
            ("resource_group_name", &self.resource_group_name),
            ("aks_cluster_name", &self.aks_cluster_name),
            ("storage_account_name", &self.storage_account_name),
        ];

        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();

        if !missing.is_empty() {
            return Err(DeployerError::ConfigError(format!(
                "Missing required configuration: {}",
                missing.join(", ")
            )));
        }

        if !self.update && self.managed_identity.is_none() {
            return Err(DeployerError::ConfigError(
                "managed_identity is required unless update is set".to_string(),
            ));
        }

        if !self.update && self.cross_subscription_aks_deployment && self.key_vault_url.is_none() {
            return Err(DeployerError::ConfigError(
                "key_vault_url is required for cross-subscription deployments".to_string(),
            ));
        }

        Ok(())
    }
}
