//! Well-known settings keys

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Flat settings dictionary exchanged with the deployment tool
pub type SettingsMap = BTreeMap<String, String>;

macro_rules! setting_keys {
    ($($variant:ident),+ $(,)?) => {
        /// Every settings key that has a location in the values document
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum SettingKey {
            $($variant),+
        }

        impl SettingKey {
            /// All known keys, in table order
            pub const ALL: &'static [SettingKey] = &[$(SettingKey::$variant),+];

            /// The key as it appears in the settings dictionary
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(SettingKey::$variant => stringify!($variant)),+
                }
            }
        }

        impl FromStr for SettingKey {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $(stringify!($variant) => Ok(SettingKey::$variant),)+
                    _ => Err(format!("Unknown setting key: {}", s)),
                }
            }
        }
    };
}

setting_keys!(
    CromwellOnAzureVersion,
    DefaultStorageAccountName,
    AzureServicesAuthConnectionString,
    ApplicationInsightsAccountName,
    CosmosDbAccountName,
    BatchAccountName,
    BatchNodesSubnetId,
    AksCoANamespace,
    DisableBatchNodesPublicIpAddress,
    DisableBatchScheduling,
    UsePreemptibleVmsOnly,
    BlobxferImageName,
    DockerInDockerImageName,
    BatchImageOffer,
    BatchImagePublisher,
    BatchImageSku,
    BatchImageVersion,
    BatchNodeAgentSkuId,
    MarthaUrl,
    MarthaKeyVaultName,
    MarthaSecretName,
    TesImageName,
    TriggerServiceImageName,
    CromwellImageName,
    CrossSubscriptionAKSDeployment,
    PostgreSqlServerName,
    PostgreSqlDatabaseName,
    PostgreSqlUserLogin,
    PostgreSqlUserPassword,
    UsePostgreSqlSingleServer,
    ManagedIdentityClientId,
);

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Interpret a settings flag the way the deployment tool writes them
pub fn is_truthy(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}
