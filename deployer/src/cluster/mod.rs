//! Cluster access: client bootstrap, readiness polling and command execution

pub mod api;
pub mod bootstrap;
pub mod exec;
pub mod memory;
pub mod readiness;
