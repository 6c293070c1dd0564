//! Cromwell on Azure Deployer Library
//!
//! Cluster bootstrap and helm values synchronization for Cromwell on Azure.

pub mod app;
pub mod cluster;
pub mod errors;
pub mod filesys;
pub mod helm;
pub mod logs;
pub mod output;
pub mod provision;
pub mod retry;
pub mod storage;
pub mod sync;
pub mod utils;
pub mod values;
