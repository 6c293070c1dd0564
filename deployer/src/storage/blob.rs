//! Remote document store backed by Azure Blob storage

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, error};
use url::Url;

use crate::errors::DeployerError;

/// Blob service REST version sent with every request
const STORAGE_API_VERSION: &str = "2021-08-06";

/// Whole-document read/write of named text blobs
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read a document; `None` when it does not exist
    async fn read(&self, container: &str, name: &str) -> Result<Option<String>, DeployerError>;

    /// Replace a document with `content`
    async fn write(&self, container: &str, name: &str, content: &str) -> Result<(), DeployerError>;
}

/// Blob REST client authenticated with an Azure AD bearer token
pub struct BlobDocumentStore {
    client: Client,
    endpoint: Url,
    token: SecretString,
}

impl BlobDocumentStore {
    /// Create a store for `https://<account>.blob.core.windows.net/`
    pub fn new(account_name: &str, token: SecretString) -> Result<Self, DeployerError> {
        let endpoint = Url::parse(&format!("https://{}.blob.core.windows.net/", account_name))
            .map_err(|e| DeployerError::ConfigError(format!("Invalid storage account name: {}", e)))?;
        Self::with_endpoint(endpoint, token)
    }

    /// Create a store against an explicit blob endpoint
    pub fn with_endpoint(endpoint: Url, token: SecretString) -> Result<Self, DeployerError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            endpoint,
            token,
        })
    }

    /// URL of a blob
    pub fn blob_url(&self, container: &str, name: &str) -> Result<Url, DeployerError> {
        self.endpoint
            .join(&format!("{}/{}", container, name))
            .map_err(|e| DeployerError::ConfigError(format!("Invalid blob path: {}", e)))
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", self.token.expose_secret()),
            )
            .header("x-ms-version", STORAGE_API_VERSION)
            .header(
                "x-ms-date",
                chrono::Utc::now()
                    .format("%a, %d %b %Y %H:%M:%S GMT")
                    .to_string(),
            )
    }
}

#[async_trait]
impl DocumentStore for BlobDocumentStore {
    async fn read(&self, container: &str, name: &str) -> Result<Option<String>, DeployerError> {
        let url = self.blob_url(container, name)?;
        debug!("GET {}", url);

        let response = self.request(reqwest::Method::GET, url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Blob download failed: {} - {}", status, body);
            return Err(DeployerError::SyncFailure(format!(
                "download of {}/{} failed: {}",
                container, name, status
            )));
        }

        Ok(Some(response.text().await?))
    }

    async fn write(&self, container: &str, name: &str, content: &str) -> Result<(), DeployerError> {
        let url = self.blob_url(container, name)?;
        debug!("PUT {}", url);

        let response = self
            .request(reqwest::Method::PUT, url)
            .header("x-ms-blob-type", "BlockBlob")
            .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(content.to_string())
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Blob upload failed: {} - {}", status, body);
            return Err(DeployerError::SyncFailure(format!(
                "upload of {}/{} failed: {}",
                container, name, status
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_url() {
        let store = BlobDocumentStore::new("acct1", SecretString::from("t".to_string())).unwrap();
        assert_eq!(
            store.blob_url("configuration", "aksValues.yaml").unwrap().as_str(),
            "https://acct1.blob.core.windows.net/configuration/aksValues.yaml"
        );
    }

    #[test]
    fn test_invalid_account_name_is_rejected() {
        let result = BlobDocumentStore::new("bad host", SecretString::from("t".to_string()));
        assert!(matches!(result, Err(DeployerError::ConfigError(_))));
    }
}
