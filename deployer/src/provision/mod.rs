//! Provisioning API access

pub mod arm;
