//! Error types for the deployer

use thiserror::Error;

/// Main error type for the deployer
#[derive(Error, Debug)]
pub enum DeployerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Cluster API error: {0}")]
    Cluster(#[from] kube::Error),

    #[error("Missing required setting: {key}")]
    MissingSetting { key: String },

    #[error("Document {container}/{name} not found in the remote store")]
    DocumentNotFound { container: String, name: String },

    #[error("Sync failure: {0}")]
    SyncFailure(String),

    #[error("Installer exited with code {exit_code}")]
    InstallerFailure { exit_code: i32 },

    #[error("Installer error: {0}")]
    InstallerError(String),

    #[error("Timed out waiting for {workload} to start")]
    WorkloadStartupTimeout { workload: String },

    #[error("Exec channel not established: {0}")]
    ChannelNotEstablished(String),

    #[error("No instance in namespace {namespace} matches {selector}")]
    InstanceNotFound { namespace: String, selector: String },

    #[error("Selector {selector} matches more than one instance: {}", .candidates.join(", "))]
    AmbiguousInstance {
        selector: String,
        candidates: Vec<String>,
    },

    #[error("Credentials error: {0}")]
    Credentials(String),

    #[error("Kubeconfig error: {0}")]
    Kubeconfig(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeployerError {
    /// Whether the error is the transient exec-channel negotiation failure
    pub fn is_channel_not_established(&self) -> bool {
        match self {
            DeployerError::ChannelNotEstablished(_) => true,
            // The websocket upgrade was refused before any stream was opened
            DeployerError::Cluster(kube::Error::UpgradeConnection(_)) => true,
            _ => false,
        }
    }
}
