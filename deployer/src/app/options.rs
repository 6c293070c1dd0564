//! Deployer run options

use crate::retry::RetryPolicy;
use crate::storage::layout::StorageLayout;

/// Options of a deployment run that do not come from the configuration file
#[derive(Debug, Clone)]
pub struct DeployerOptions {
    /// Storage layout paths
    pub layout: StorageLayout,

    /// Workload readiness polling
    pub readiness: RetryPolicy,

    /// Re-opening of refused exec channels
    pub exec: RetryPolicy,
}

impl Default for DeployerOptions {
    fn default() -> Self {
        Self {
            layout: StorageLayout::default(),
            readiness: RetryPolicy::workload_ready(),
            exec: RetryPolicy::exec_channel(),
        }
    }
}
