//! In-memory cluster

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::FutureExt;

use crate::cluster::api::{
    ClusterApi, ExecExit, ExecSession, ExecStream, InstanceInfo, WorkloadStatus,
};
use crate::errors::DeployerError;

/// One recorded exec invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecCall {
    pub namespace: String,
    pub instance: String,
    pub container: String,
    pub command: Vec<String>,
}

/// Cluster kept in process memory
///
/// Workloads become ready after a configurable number of workload queries;
/// exec channels can be made to fail a number of times before opening, or
/// to fail on every attempt with a non-transient error.
#[derive(Debug, Default)]
pub struct MemoryCluster {
    instances: Mutex<Vec<InstanceInfo>>,
    workloads: Mutex<HashMap<String, u32>>,
    workload_queries: AtomicU32,
    failing_queries: AtomicU32,
    failing_execs: AtomicU32,
    exec_error: Mutex<Option<String>>,
    exec_attempts: AtomicU32,
    exec_calls: Mutex<Vec<ExecCall>>,
    output: Mutex<(String, String)>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a running instance
    pub fn add_instance(&self, name: &str, labels: &[(&str, &str)]) {
        if let Ok(mut instances) = self.instances.lock() {
            instances.push(InstanceInfo {
                name: name.to_string(),
                labels: labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            });
        }
    }

    /// Add a workload that reports a ready replica from the `ready_on`-th query on
    pub fn add_workload(&self, name: &str, ready_on: u32) {
        if let Ok(mut workloads) = self.workloads.lock() {
            workloads.insert(name.to_string(), ready_on);
        }
    }

    /// Make the next `count` workload queries fail
    pub fn fail_workload_queries(&self, count: u32) {
        self.failing_queries.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` exec attempts fail with `ChannelNotEstablished`
    pub fn fail_exec_channels(&self, count: u32) {
        self.failing_execs.store(count, Ordering::SeqCst);
    }

    /// Make every exec attempt fail with an error that is not a channel failure
    pub fn fail_exec_with(&self, message: &str) {
        if let Ok(mut error) = self.exec_error.lock() {
            *error = Some(message.to_string());
        }
    }

    /// Output produced by every successful exec
    pub fn set_exec_output(&self, stdout: &str, stderr: &str) {
        if let Ok(mut output) = self.output.lock() {
            *output = (stdout.to_string(), stderr.to_string());
        }
    }

    /// Number of workload queries so far
    pub fn workload_queries(&self) -> u32 {
        self.workload_queries.load(Ordering::SeqCst)
    }

    /// Number of exec attempts so far, failed ones included
    pub fn exec_attempts(&self) -> u32 {
        self.exec_attempts.load(Ordering::SeqCst)
    }

    /// Exec channels that opened successfully
    pub fn exec_calls(&self) -> Vec<ExecCall> {
        self.exec_calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn poisoned() -> DeployerError {
    DeployerError::Internal("Memory cluster lock poisoned".into())
}

#[async_trait]
impl ClusterApi for MemoryCluster {
    async fn list_instances(&self, _namespace: &str) -> Result<Vec<InstanceInfo>, DeployerError> {
        Ok(self.instances.lock().map_err(|_| poisoned())?.clone())
    }

    async fn list_workloads(&self, _namespace: &str) -> Result<Vec<WorkloadStatus>, DeployerError> {
        let query = self.workload_queries.fetch_add(1, Ordering::SeqCst) + 1;
        if take_one(&self.failing_queries) {
            return Err(DeployerError::Internal("workload query failed".into()));
        }

        let workloads = self.workloads.lock().map_err(|_| poisoned())?;
        Ok(workloads
            .iter()
            .map(|(name, ready_on)| WorkloadStatus {
                name: name.clone(),
                ready_replicas: if query >= *ready_on { 1 } else { 0 },
            })
            .collect())
    }

    async fn exec(
        &self,
        namespace: &str,
        instance: &str,
        container: &str,
        command: &[String],
    ) -> Result<ExecSession, DeployerError> {
        let attempt = self.exec_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if take_one(&self.failing_execs) {
            return Err(DeployerError::ChannelNotEstablished(format!(
                "handshake {} refused",
                attempt
            )));
        }
        if let Some(message) = self.exec_error.lock().map_err(|_| poisoned())?.clone() {
            return Err(DeployerError::Internal(message));
        }

        self.exec_calls.lock().map_err(|_| poisoned())?.push(ExecCall {
            namespace: namespace.to_string(),
            instance: instance.to_string(),
            container: container.to_string(),
            command: command.to_vec(),
        });

        let (stdout, stderr) = self.output.lock().map_err(|_| poisoned())?.clone();
        Ok(ExecSession {
            stdout: Some(Box::new(Cursor::new(stdout.into_bytes())) as ExecStream),
            stderr: Some(Box::new(Cursor::new(stderr.into_bytes())) as ExecStream),
            completion: futures::future::ready(Ok(ExecExit::success())).boxed(),
        })
    }
}
