//! Settings <-> values document mapping
//!
//! [`SETTING_BINDINGS`] is the single table that places each settings key in
//! the values document. Both directions walk the same table, which keeps
//! `to_settings(to_document(s, t)) == s` for every known key.

use std::fmt;

use tracing::warn;

use crate::errors::DeployerError;
use crate::values::document::ConfigurationDocument;
use crate::values::keys::{SettingKey, SettingsMap};

/// Top-level values section holding a bound setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Config,
    Images,
    Persistence,
    Identity,
}

impl Section {
    /// YAML name of the section
    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Config => "config",
            Section::Images => "images",
            Section::Persistence => "persistence",
            Section::Identity => "identity",
        }
    }
}

/// Location of one settings key inside the values document
pub struct SettingBinding {
    pub key: SettingKey,
    pub section: Section,
    pub field: &'static str,
    get: fn(&ConfigurationDocument) -> &Option<String>,
    get_mut: fn(&mut ConfigurationDocument) -> &mut Option<String>,
}

impl SettingBinding {
    /// Read the bound value from a document
    pub fn get<'a>(&self, document: &'a ConfigurationDocument) -> Option<&'a str> {
        (self.get)(document).as_deref()
    }

    /// Store a value at the bound location
    pub fn set(&self, document: &mut ConfigurationDocument, value: String) {
        *(self.get_mut)(document) = Some(value);
    }

    /// Dotted path, e.g. `config.coaNamespace`
    pub fn location(&self) -> String {
        format!("{}.{}", self.section.as_str(), self.field)
    }
}

impl fmt::Debug for SettingBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.key, self.location())
    }
}

macro_rules! bind {
    ($key:ident => $section:ident, $doc_field:ident . $field:ident, $yaml:literal) => {
        SettingBinding {
            key: SettingKey::$key,
            section: Section::$section,
            field: $yaml,
            get: {
                fn get(document: &ConfigurationDocument) -> &Option<String> {
                    &document.$doc_field.$field
                }
                get
            },
            get_mut: {
                fn get_mut(document: &mut ConfigurationDocument) -> &mut Option<String> {
                    &mut document.$doc_field.$field
                }
                get_mut
            },
        }
    };
}

/// Every settings key and where it lives in the values document
pub static SETTING_BINDINGS: &[SettingBinding] = &[
    bind!(CromwellOnAzureVersion => Config, config.cromwell_on_azure_version, "cromwellOnAzureVersion"),
    bind!(DefaultStorageAccountName => Persistence, persistence.storage_account, "storageAccount"),
    bind!(AzureServicesAuthConnectionString => Config, config.azure_services_auth_connection_string, "azureServicesAuthConnectionString"),
    bind!(ApplicationInsightsAccountName => Config, config.application_insights_account_name, "applicationInsightsAccountName"),
    bind!(CosmosDbAccountName => Config, config.cosmos_db_account_name, "cosmosDbAccountName"),
    bind!(BatchAccountName => Config, config.batch_account_name, "batchAccountName"),
    bind!(BatchNodesSubnetId => Config, config.batch_nodes_subnet_id, "batchNodesSubnetId"),
    bind!(AksCoANamespace => Config, config.coa_namespace, "coaNamespace"),
    bind!(DisableBatchNodesPublicIpAddress => Config, config.disable_batch_nodes_public_ip_address, "disableBatchNodesPublicIpAddress"),
    bind!(DisableBatchScheduling => Config, config.disable_batch_scheduling, "disableBatchScheduling"),
    bind!(UsePreemptibleVmsOnly => Config, config.use_preemptible_vms_only, "usePreemptibleVmsOnly"),
    bind!(BlobxferImageName => Config, config.blobxfer_image_name, "blobxferImageName"),
    bind!(DockerInDockerImageName => Config, config.docker_in_docker_image_name, "dockerInDockerImageName"),
    bind!(BatchImageOffer => Config, config.batch_image_offer, "batchImageOffer"),
    bind!(BatchImagePublisher => Config, config.batch_image_publisher, "batchImagePublisher"),
    bind!(BatchImageSku => Config, config.batch_image_sku, "batchImageSku"),
    bind!(BatchImageVersion => Config, config.batch_image_version, "batchImageVersion"),
    bind!(BatchNodeAgentSkuId => Config, config.batch_node_agent_sku_id, "batchNodeAgentSkuId"),
    bind!(MarthaUrl => Config, config.martha_url, "marthaUrl"),
    bind!(MarthaKeyVaultName => Config, config.martha_key_vault_name, "marthaKeyVaultName"),
    bind!(MarthaSecretName => Config, config.martha_secret_name, "marthaSecretName"),
    bind!(TesImageName => Images, images.tes, "tes"),
    bind!(TriggerServiceImageName => Images, images.trigger_service, "triggerservice"),
    bind!(CromwellImageName => Images, images.cromwell, "cromwell"),
    bind!(CrossSubscriptionAKSDeployment => Config, config.cross_subscription_aks_deployment, "crossSubscriptionAKSDeployment"),
    bind!(PostgreSqlServerName => Config, config.postgre_sql_server_name, "postgreSqlServerName"),
    bind!(PostgreSqlDatabaseName => Config, config.postgre_sql_database_name, "postgreSqlDatabaseName"),
    bind!(PostgreSqlUserLogin => Config, config.postgre_sql_user_login, "postgreSqlUserLogin"),
    bind!(PostgreSqlUserPassword => Config, config.postgre_sql_user_password, "postgreSqlUserPassword"),
    bind!(UsePostgreSqlSingleServer => Config, config.use_postgre_sql_single_server, "usePostgreSqlSingleServer"),
    bind!(ManagedIdentityClientId => Identity, identity.client_id, "clientId"),
];

/// Write every known setting into `document`
///
/// Fails with `MissingSetting` on the first known key absent from `settings`.
/// Keys without a binding are logged and left out.
pub fn to_document(
    settings: &SettingsMap,
    mut document: ConfigurationDocument,
) -> Result<ConfigurationDocument, DeployerError> {
    for binding in SETTING_BINDINGS {
        let value = settings
            .get(binding.key.as_str())
            .ok_or_else(|| DeployerError::MissingSetting {
                key: binding.key.to_string(),
            })?;
        binding.set(&mut document, value.clone());
    }

    for key in settings.keys() {
        if key.parse::<SettingKey>().is_err() {
            warn!("Setting {} has no location in the values document, ignoring it", key);
        }
    }

    Ok(document)
}

/// Read every known setting out of `document`; unset fields read as ""
pub fn to_settings(document: &ConfigurationDocument) -> SettingsMap {
    SETTING_BINDINGS
        .iter()
        .map(|binding| {
            (
                binding.key.to_string(),
                binding.get(document).unwrap_or_default().to_string(),
            )
        })
        .collect()
}

/// Apply a possibly partial overlay on top of the settings already in `document`
pub fn apply_overlay(
    overlay: &SettingsMap,
    document: ConfigurationDocument,
) -> Result<ConfigurationDocument, DeployerError> {
    let mut merged = to_settings(&document);
    merged.extend(overlay.iter().map(|(k, v)| (k.clone(), v.clone())));
    to_document(&merged, document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::document::{ConfigSection, IdentitySection, ImagesSection, PersistenceSection};
    use std::collections::HashSet;

    fn full_settings() -> SettingsMap {
        SettingKey::ALL
            .iter()
            .map(|k| (k.to_string(), format!("value-of-{}", k)))
            .collect()
    }

    #[test]
    fn test_every_key_bound_exactly_once() {
        let bound: HashSet<_> = SETTING_BINDINGS.iter().map(|b| b.key).collect();
        assert_eq!(bound.len(), SETTING_BINDINGS.len());
        assert_eq!(bound.len(), SettingKey::ALL.len());
    }

    #[test]
    fn test_locations_are_unique_and_declared() {
        let mut seen = HashSet::new();
        for binding in SETTING_BINDINGS {
            assert!(seen.insert(binding.location()), "duplicate {:?}", binding);
            let declared = match binding.section {
                Section::Config => ConfigSection::FIELDS,
                Section::Images => ImagesSection::FIELDS,
                Section::Persistence => PersistenceSection::FIELDS,
                Section::Identity => IdentitySection::FIELDS,
            };
            assert!(declared.contains(&binding.field), "undeclared {:?}", binding);
        }
    }

    #[test]
    fn test_round_trip_over_all_keys() {
        let settings = full_settings();
        let document = to_document(&settings, ConfigurationDocument::default()).unwrap();
        assert_eq!(to_settings(&document), settings);
    }

    #[test]
    fn test_round_trip_ignores_template_contents() {
        let mut template = ConfigurationDocument::default();
        template.config.cromwell_on_azure_version = Some("0.1".to_string());
        template.identity.client_id = Some("stale".to_string());
        template.default_containers = vec!["inputs".to_string()];

        let settings = full_settings();
        let document = to_document(&settings, template).unwrap();
        assert_eq!(to_settings(&document), settings);
        assert_eq!(document.default_containers, vec!["inputs".to_string()]);
    }

    #[test]
    fn test_missing_key_is_named() {
        let mut settings = full_settings();
        settings.remove("MarthaUrl");

        let err = to_document(&settings, ConfigurationDocument::default()).unwrap_err();
        match err {
            DeployerError::MissingSetting { key } => assert_eq!(key, "MarthaUrl"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_unknown_keys_are_not_rejected() {
        let mut settings = full_settings();
        settings.insert("SomethingNew".to_string(), "x".to_string());

        let document = to_document(&settings, ConfigurationDocument::default()).unwrap();
        assert!(!to_settings(&document).contains_key("SomethingNew"));
    }

    #[test]
    fn test_bound_values_land_in_yaml_sections() {
        let document = to_document(&full_settings(), ConfigurationDocument::default()).unwrap();
        let yaml: serde_yaml::Value = serde_yaml::from_str(&document.to_yaml().unwrap()).unwrap();

        for binding in SETTING_BINDINGS {
            let value = &yaml[binding.section.as_str()][binding.field];
            assert_eq!(
                value.as_str(),
                Some(format!("value-of-{}", binding.key).as_str()),
                "{:?}",
                binding
            );
        }
    }

    #[test]
    fn test_overlay_only_changes_given_keys() {
        let document = to_document(&full_settings(), ConfigurationDocument::default()).unwrap();
        let overlay = SettingsMap::from([("TesImageName".to_string(), "tes:2".to_string())]);

        let updated = apply_overlay(&overlay, document).unwrap();
        let settings = to_settings(&updated);
        assert_eq!(settings["TesImageName"], "tes:2");
        assert_eq!(settings["CromwellImageName"], "value-of-CromwellImageName");
    }
}
