//! In-memory document store

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::DeployerError;
use crate::storage::blob::DocumentStore;

/// Document store kept in process memory
///
/// Reads and writes can be made to fail on demand to exercise transfer
/// error paths.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: Mutex<HashMap<(String, String), String>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current content of a document
    pub fn get(&self, container: &str, name: &str) -> Option<String> {
        self.documents
            .lock()
            .ok()
            .and_then(|docs| docs.get(&(container.to_string(), name.to_string())).cloned())
    }

    /// Store a document directly, bypassing the write counter
    pub fn insert(&self, container: &str, name: &str, content: impl Into<String>) {
        if let Ok(mut docs) = self.documents.lock() {
            docs.insert((container.to_string(), name.to_string()), content.into());
        }
    }

    /// Make subsequent reads fail with a transport-style error
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent writes fail with `SyncFailure`
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn read(&self, container: &str, name: &str) -> Result<Option<String>, DeployerError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(DeployerError::IoError(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("download of {}/{} refused", container, name),
            )));
        }
        Ok(self.get(container, name))
    }

    async fn write(&self, container: &str, name: &str, content: &str) -> Result<(), DeployerError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DeployerError::SyncFailure(format!(
                "upload of {}/{} rejected",
                container, name
            )));
        }

        let mut docs = self
            .documents
            .lock()
            .map_err(|_| DeployerError::Internal("Document store lock poisoned".into()))?;
        docs.insert((container.to_string(), name.to_string()), content.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
