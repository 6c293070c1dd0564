//! Local file layout used by a deployment run

use std::path::PathBuf;

use crate::filesys::file::File;

/// Well-known local paths for one run
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Directory holding `config.json` and the `scripts/helm` chart
    pub working_dir: PathBuf,

    /// Directory receiving the admin kubeconfig
    pub temp_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(working_dir: impl Into<PathBuf>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            temp_dir: temp_dir.into(),
        }
    }

    /// Optional deployer configuration file
    pub fn config_file(&self) -> File {
        File::new(self.working_dir.join("config.json"))
    }

    /// Directory of the chart installed into the cluster
    pub fn chart_dir(&self) -> PathBuf {
        self.working_dir.join("scripts").join("helm")
    }

    /// Packaged values template rendered on first publish
    pub fn values_template_file(&self) -> File {
        File::new(self.chart_dir().join("values-template.yaml"))
    }

    /// Rendered values consumed by the chart installer
    pub fn values_file(&self) -> File {
        File::new(self.chart_dir().join("values.yaml"))
    }

    /// Admin kubeconfig written by the client bootstrapper
    pub fn kubeconfig_file(&self) -> File {
        File::new(self.temp_dir.join("kubeconfig.txt"))
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::new(".", std::env::temp_dir())
    }
}
