//! Values synchronization through a deployment run

use std::collections::HashMap;
use std::sync::Arc;

use coadeploy::app::run::sync_values;
use coadeploy::errors::DeployerError;
use coadeploy::storage::layout::StorageLayout;
use coadeploy::storage::memory::MemoryDocumentStore;
use coadeploy::storage::settings::DeployerConfig;
use coadeploy::sync::synchronizer::{ValuesSynchronizer, VALUES_BLOB_NAME, VALUES_CONTAINER};
use coadeploy::values::keys::{SettingKey, SettingsMap};
use serde_json::json;
use tokio_util::sync::CancellationToken;

const TEMPLATE: &str = r#"
config:
  cromwellOnAzureVersion: ""
defaultContainers:
  - inputs
  - outputs
"#;

fn full_settings(version: &str) -> SettingsMap {
    let mut settings: SettingsMap = SettingKey::ALL
        .iter()
        .map(|key| (key.to_string(), String::new()))
        .collect();
    settings.insert("CromwellOnAzureVersion".into(), version.into());
    settings.insert("DefaultStorageAccountName".into(), "acct1".into());
    settings.insert("CrossSubscriptionAKSDeployment".into(), "false".into());
    settings.insert("AksCoANamespace".into(), "coa".into());
    settings
}

fn config(update: bool, settings: &SettingsMap) -> DeployerConfig {
    let value = json!({
        "subscription_id": "sub1",
        "resource_group_name": "rg1",
        "aks_cluster_name": "aks1",
        "storage_account_name": "acct1",
        "update": update,
        "settings": settings,
        "managed_identity": {
            "name": "coa-identity",
            "resource_id": "/subscriptions/sub1/resourceGroups/rg1/providers/Microsoft.ManagedIdentity/userAssignedIdentities/coa-identity",
            "client_id": "00000000-0000-0000-0000-000000000001",
        },
    });
    DeployerConfig::from_sources(value, &HashMap::new()).unwrap()
}

struct Fixture {
    _dir: tempfile::TempDir,
    layout: StorageLayout,
    store: Arc<MemoryDocumentStore>,
    sync: ValuesSynchronizer,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let layout = StorageLayout::new(dir.path().join("work"), dir.path().join("tmp"));
    let store = Arc::new(MemoryDocumentStore::new());
    let sync = ValuesSynchronizer::new(store.clone(), VALUES_CONTAINER, layout.values_file());
    Fixture {
        _dir: dir,
        layout,
        store,
        sync,
    }
}

async fn write_template(layout: &StorageLayout) {
    layout
        .values_template_file()
        .write_atomic(TEMPLATE.as_bytes())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_publish_then_upgrade_version() {
    let f = fixture();
    write_template(&f.layout).await;
    let cancel = CancellationToken::new();

    let published = sync_values(&config(false, &full_settings("2.0")), &f.layout, &f.sync, &cancel)
        .await
        .unwrap();
    assert_eq!(published.config.cromwell_on_azure_version.as_deref(), Some("2.0"));
    assert_eq!(published.persistence.storage_account.as_deref(), Some("acct1"));

    let overlay = SettingsMap::from([("CromwellOnAzureVersion".to_string(), "2.1".to_string())]);
    sync_values(&config(true, &overlay), &f.layout, &f.sync, &cancel)
        .await
        .unwrap();

    let current = f.sync.current_settings(&cancel).await.unwrap();
    assert_eq!(current["CromwellOnAzureVersion"], "2.1");
    assert_eq!(current["DefaultStorageAccountName"], "acct1");
    assert_eq!(
        current["ManagedIdentityClientId"],
        "00000000-0000-0000-0000-000000000001"
    );

    let remote = f.store.get(VALUES_CONTAINER, VALUES_BLOB_NAME).unwrap();
    let local = f.layout.values_file().read_string().await.unwrap();
    assert_eq!(remote, local);
    assert_eq!(f.store.write_count(), 2);
}

#[tokio::test]
async fn test_publish_requires_template() {
    let f = fixture();

    let err = sync_values(
        &config(false, &full_settings("2.0")),
        &f.layout,
        &f.sync,
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, DeployerError::ConfigError(_)));
    assert_eq!(f.store.write_count(), 0);
}

#[tokio::test]
async fn test_update_without_published_document() {
    let f = fixture();

    let err = sync_values(
        &config(true, &SettingsMap::new()),
        &f.layout,
        &f.sync,
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    match err {
        DeployerError::DocumentNotFound { container, name } => {
            assert_eq!(container, "configuration");
            assert_eq!(name, "aksValues.yaml");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(!f.layout.values_file().exists().await);
}

#[tokio::test]
async fn test_rejected_upload_leaves_no_local_values() {
    let f = fixture();
    write_template(&f.layout).await;
    f.store.set_fail_writes(true);

    let err = sync_values(
        &config(false, &full_settings("2.0")),
        &f.layout,
        &f.sync,
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, DeployerError::SyncFailure(_)));
    assert!(!f.layout.values_file().exists().await);
}

#[tokio::test]
async fn test_cross_subscription_flag_selects_key_vault_access() {
    let f = fixture();
    write_template(&f.layout).await;

    let mut settings = full_settings("2.0");
    settings.remove("CrossSubscriptionAKSDeployment");
    let value = json!({
        "subscription_id": "sub1",
        "resource_group_name": "rg1",
        "aks_cluster_name": "aks1",
        "storage_account_name": "acct1",
        "cross_subscription_aks_deployment": true,
        "key_vault_url": "https://kv1.vault.azure.net/",
        "settings": settings,
        "managed_identity": {
            "name": "coa-identity",
            "resource_id": "/subscriptions/sub1/resourceGroups/rg1/providers/Microsoft.ManagedIdentity/userAssignedIdentities/coa-identity",
            "client_id": "00000000-0000-0000-0000-000000000001",
        },
    });
    let config = DeployerConfig::from_sources(value, &HashMap::new()).unwrap();

    let published = sync_values(&config, &f.layout, &f.sync, &CancellationToken::new())
        .await
        .unwrap();

    let key_vault = published.internal_containers_key_vault_auth.unwrap();
    assert!(!key_vault.is_empty());
    assert!(key_vault
        .iter()
        .all(|entry| entry.key_vault_url == "https://kv1.vault.azure.net/"));
    assert!(published.internal_containers_managed_identity_auth.is_none());
}
