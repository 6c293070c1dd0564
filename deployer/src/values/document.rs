//! Typed helm values document

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::DeployerError;

/// Declares a values section whose known fields are optional strings.
///
/// Entries of the template that have no field here are kept in `extra` so
/// that re-serializing a downloaded document never loses chart settings.
macro_rules! values_section {
    ($(#[$meta:meta])* $name:ident { $($field:ident => $yaml:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
        pub struct $name {
            $(
                #[serde(rename = $yaml, default, skip_serializing_if = "Option::is_none")]
                pub $field: Option<String>,
            )+

            #[serde(flatten)]
            pub extra: BTreeMap<String, String>,
        }

        impl $name {
            /// YAML names of the typed fields
            pub const FIELDS: &'static [&'static str] = &[$($yaml),+];
        }
    };
}

values_section!(
    /// `config` section
    ConfigSection {
        cromwell_on_azure_version => "cromwellOnAzureVersion",
        resource_group => "resourceGroup",
        azure_services_auth_connection_string => "azureServicesAuthConnectionString",
        application_insights_account_name => "applicationInsightsAccountName",
        cosmos_db_account_name => "cosmosDbAccountName",
        batch_account_name => "batchAccountName",
        batch_nodes_subnet_id => "batchNodesSubnetId",
        coa_namespace => "coaNamespace",
        disable_batch_nodes_public_ip_address => "disableBatchNodesPublicIpAddress",
        disable_batch_scheduling => "disableBatchScheduling",
        use_preemptible_vms_only => "usePreemptibleVmsOnly",
        blobxfer_image_name => "blobxferImageName",
        docker_in_docker_image_name => "dockerInDockerImageName",
        batch_image_offer => "batchImageOffer",
        batch_image_publisher => "batchImagePublisher",
        batch_image_sku => "batchImageSku",
        batch_image_version => "batchImageVersion",
        batch_node_agent_sku_id => "batchNodeAgentSkuId",
        martha_url => "marthaUrl",
        martha_key_vault_name => "marthaKeyVaultName",
        martha_secret_name => "marthaSecretName",
        cross_subscription_aks_deployment => "crossSubscriptionAKSDeployment",
        postgre_sql_server_name => "postgreSqlServerName",
        postgre_sql_database_name => "postgreSqlDatabaseName",
        postgre_sql_user_login => "postgreSqlUserLogin",
        postgre_sql_user_password => "postgreSqlUserPassword",
        use_postgre_sql_single_server => "usePostgreSqlSingleServer",
    }
);

values_section!(
    /// `images` section
    ImagesSection {
        tes => "tes",
        trigger_service => "triggerservice",
        cromwell => "cromwell",
    }
);

values_section!(
    /// `persistence` section
    PersistenceSection {
        storage_account => "storageAccount",
    }
);

values_section!(
    /// `identity` section
    IdentitySection {
        name => "name",
        resource_id => "resourceId",
        client_id => "clientId",
    }
);

/// Blob container mounted through the cluster's managed identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedIdentityContainerAuth {
    pub account_name: String,
    pub container_name: String,
    pub resource_group: String,
}

/// Blob container mounted with an account key held in key vault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyVaultContainerAuth {
    pub account_name: String,
    pub container_name: String,
    #[serde(rename = "keyVaultURL")]
    pub key_vault_url: String,
    pub key_vault_secret_name: String,
}

/// How the default containers are mounted into the workloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerAccess {
    /// Same-subscription deployment, the cluster identity reaches the account
    ManagedIdentity {
        account_name: String,
        resource_group: String,
    },

    /// Cross-subscription deployment, the account key comes from key vault
    KeyVault {
        account_name: String,
        key_vault_url: String,
        secret_name: String,
    },
}

/// The values document consumed by the chart at install time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationDocument {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub service: BTreeMap<String, String>,

    #[serde(default)]
    pub config: ConfigSection,

    #[serde(default)]
    pub images: ImagesSection,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default_containers: Vec<String>,

    #[serde(
        rename = "internalContainersMIAuth",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub internal_containers_managed_identity_auth: Option<Vec<ManagedIdentityContainerAuth>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_containers_key_vault_auth: Option<Vec<KeyVaultContainerAuth>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_containers: Option<Vec<BTreeMap<String, String>>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_sas_containers: Option<Vec<BTreeMap<String, String>>>,

    #[serde(default)]
    pub persistence: PersistenceSection,

    #[serde(default)]
    pub identity: IdentitySection,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub db: BTreeMap<String, String>,
}

impl ConfigurationDocument {
    /// Parse a values document; blank input is the empty template
    pub fn from_yaml(text: &str) -> Result<Self, DeployerError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Serialize the document
    pub fn to_yaml(&self) -> Result<String, DeployerError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Populate exactly one access list from `default_containers`
    pub fn bind_container_access(&mut self, access: &ContainerAccess) {
        match access {
            ContainerAccess::ManagedIdentity {
                account_name,
                resource_group,
            } => {
                let entries = self
                    .default_containers
                    .iter()
                    .map(|container| ManagedIdentityContainerAuth {
                        account_name: account_name.clone(),
                        container_name: container.clone(),
                        resource_group: resource_group.clone(),
                    })
                    .collect();
                self.internal_containers_managed_identity_auth = Some(entries);
                self.internal_containers_key_vault_auth = None;
            }
            ContainerAccess::KeyVault {
                account_name,
                key_vault_url,
                secret_name,
            } => {
                let entries = self
                    .default_containers
                    .iter()
                    .map(|container| KeyVaultContainerAuth {
                        account_name: account_name.clone(),
                        container_name: container.clone(),
                        key_vault_url: key_vault_url.clone(),
                        key_vault_secret_name: secret_name.clone(),
                    })
                    .collect();
                self.internal_containers_key_vault_auth = Some(entries);
                self.internal_containers_managed_identity_auth = None;
            }
        }
    }
}
