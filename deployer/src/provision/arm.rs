//! Azure Resource Manager client

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::{header, Client};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, error};

use crate::cluster::bootstrap::CredentialSource;
use crate::errors::DeployerError;

/// Public cloud management endpoint
pub const MANAGEMENT_ENDPOINT: &str = "https://management.azure.com";

/// Managed cluster API version used for credential requests
const CONTAINER_SERVICE_API_VERSION: &str = "2023-08-01";

/// Credential list returned by `listClusterAdminCredential`
#[derive(Debug, Deserialize)]
pub struct CredentialResults {
    #[serde(default)]
    pub kubeconfigs: Vec<CredentialResult>,
}

#[derive(Debug, Deserialize)]
pub struct CredentialResult {
    pub name: Option<String>,

    /// Base64-encoded kubeconfig
    pub value: String,
}

impl CredentialResults {
    /// Decode the first kubeconfig
    pub fn first_kubeconfig(&self) -> Result<SecretString, DeployerError> {
        let credential = self.kubeconfigs.first().ok_or_else(|| {
            DeployerError::Credentials("No kubeconfig returned for the cluster".to_string())
        })?;

        let bytes = STANDARD
            .decode(credential.value.trim())
            .map_err(|e| DeployerError::Credentials(format!("Invalid kubeconfig encoding: {}", e)))?;
        let text = String::from_utf8(bytes)
            .map_err(|e| DeployerError::Credentials(format!("Kubeconfig is not UTF-8: {}", e)))?;

        Ok(SecretString::from(text))
    }
}

/// ARM client for one subscription, authenticated with a bearer token
pub struct ArmClient {
    client: Client,
    base_url: String,
    subscription_id: String,
    token: SecretString,
}

impl ArmClient {
    /// Create a client against the public cloud
    pub fn new(subscription_id: &str, token: SecretString) -> Result<Self, DeployerError> {
        Self::with_base_url(MANAGEMENT_ENDPOINT, subscription_id, token)
    }

    /// Create a client against an explicit management endpoint
    pub fn with_base_url(
        base_url: &str,
        subscription_id: &str,
        token: SecretString,
    ) -> Result<Self, DeployerError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            subscription_id: subscription_id.to_string(),
            token,
        })
    }

    /// Path of the admin credential action of a managed cluster
    pub fn admin_credential_path(&self, resource_group: &str, cluster_name: &str) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.ContainerService/managedClusters/{}/listClusterAdminCredential?api-version={}",
            self.subscription_id, resource_group, cluster_name, CONTAINER_SERVICE_API_VERSION
        )
    }

    /// Make a POST request with an empty body
    pub async fn post<T: DeserializeOwned>(&self, path: &str) -> Result<T, DeployerError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", self.token.expose_secret()),
            )
            .header(header::CONTENT_LENGTH, 0)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("ARM POST failed: {} - {}", status, body);
            return Err(DeployerError::Credentials(format!("{}: {}", status, body)));
        }

        let body = response.json().await?;
        Ok(body)
    }
}

#[async_trait]
impl CredentialSource for ArmClient {
    async fn fetch_admin_kubeconfig(
        &self,
        resource_group: &str,
        cluster_name: &str,
    ) -> Result<SecretString, DeployerError> {
        let results: CredentialResults = self
            .post(&self.admin_credential_path(resource_group, cluster_name))
            .await?;
        results.first_kubeconfig()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_credential_path() {
        let client = ArmClient::new("sub1", SecretString::from("t".to_string())).unwrap();
        assert_eq!(
            client.admin_credential_path("rg1", "aks1"),
            "/subscriptions/sub1/resourceGroups/rg1/providers/Microsoft.ContainerService/managedClusters/aks1/listClusterAdminCredential?api-version=2023-08-01"
        );
    }

    #[test]
    fn test_first_kubeconfig_is_decoded() {
        let results: CredentialResults = serde_json::from_value(serde_json::json!({
            "kubeconfigs": [
                { "name": "clusterAdmin", "value": STANDARD.encode("apiVersion: v1\n") },
                { "name": "other", "value": STANDARD.encode("ignored") },
            ]
        }))
        .unwrap();

        let kubeconfig = results.first_kubeconfig().unwrap();
        assert_eq!(kubeconfig.expose_secret(), "apiVersion: v1\n");
    }

    #[test]
    fn test_missing_or_invalid_kubeconfig() {
        let empty: CredentialResults = serde_json::from_str("{}").unwrap();
        assert!(matches!(
            empty.first_kubeconfig(),
            Err(DeployerError::Credentials(_))
        ));

        let invalid: CredentialResults =
            serde_json::from_str(r#"{"kubeconfigs":[{"value":"not base64!"}]}"#).unwrap();
        assert!(matches!(
            invalid.first_kubeconfig(),
            Err(DeployerError::Credentials(_))
        ));
    }
}
