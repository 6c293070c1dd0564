//! Values document and settings mapping tests

use coadeploy::errors::DeployerError;
use coadeploy::values::document::ConfigurationDocument;
use coadeploy::values::keys::{SettingKey, SettingsMap};
use coadeploy::values::mapper::{apply_overlay, to_document, to_settings};

const TEMPLATE: &str = r#"
service:
  tesHostname: tes
config:
  cromwellOnAzureVersion: "1.0"
  azureCloudName: AzureCloud
images:
  tes: mcr.microsoft.com/cromwellonazure/tes:1.0
  triggerservice: mcr.microsoft.com/cromwellonazure/triggerservice:1.0
  cromwell: broadinstitute/cromwell:58
defaultContainers:
  - configuration
  - cromwell-executions
  - cromwell-workflow-logs
  - inputs
  - outputs
persistence:
  storageAccount: ""
identity:
  name: ""
db:
  mysqlDatabase: cromwell_db
"#;

fn settings() -> SettingsMap {
    SettingKey::ALL
        .iter()
        .map(|key| (key.to_string(), format!("{}-1", key)))
        .collect()
}

#[test]
fn test_template_entries_survive_round_trip() {
    let template = ConfigurationDocument::from_yaml(TEMPLATE).unwrap();
    let document = to_document(&settings(), template).unwrap();

    let reparsed = ConfigurationDocument::from_yaml(&document.to_yaml().unwrap()).unwrap();
    assert_eq!(reparsed, document);
    assert_eq!(reparsed.service["tesHostname"], "tes");
    assert_eq!(reparsed.config.extra["azureCloudName"], "AzureCloud");
    assert_eq!(reparsed.db["mysqlDatabase"], "cromwell_db");
    assert_eq!(reparsed.default_containers.len(), 5);
}

#[test]
fn test_settings_round_trip_through_yaml() {
    let template = ConfigurationDocument::from_yaml(TEMPLATE).unwrap();
    let document = to_document(&settings(), template).unwrap();
    let reparsed = ConfigurationDocument::from_yaml(&document.to_yaml().unwrap()).unwrap();

    assert_eq!(to_settings(&reparsed), settings());
}

#[test]
fn test_image_settings_land_in_images_section() {
    let template = ConfigurationDocument::from_yaml(TEMPLATE).unwrap();
    let mut settings = settings();
    settings.insert("TesImageName".into(), "tes:2.1".into());
    settings.insert("TriggerServiceImageName".into(), "trigger:2.1".into());

    let document = to_document(&settings, template).unwrap();
    assert_eq!(document.images.tes.as_deref(), Some("tes:2.1"));
    assert_eq!(document.images.trigger_service.as_deref(), Some("trigger:2.1"));
}

#[test]
fn test_unknown_setting_is_ignored() {
    let mut settings = settings();
    settings.insert("NotARealSetting".into(), "x".into());

    let document = to_document(&settings, ConfigurationDocument::default()).unwrap();
    assert!(!to_settings(&document).contains_key("NotARealSetting"));
}

#[test]
fn test_missing_setting_names_the_key() {
    let mut settings = settings();
    settings.remove("MarthaUrl");

    let err = to_document(&settings, ConfigurationDocument::default()).unwrap_err();
    match err {
        DeployerError::MissingSetting { key } => assert_eq!(key, "MarthaUrl"),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_partial_overlay_keeps_other_values() {
    let document = to_document(&settings(), ConfigurationDocument::default()).unwrap();
    let overlay = SettingsMap::from([("BatchImageVersion".to_string(), "latest".to_string())]);

    let updated = apply_overlay(&overlay, document).unwrap();
    let current = to_settings(&updated);
    assert_eq!(current["BatchImageVersion"], "latest");
    assert_eq!(current["BatchImageSku"], "BatchImageSku-1");
}
