//! Deployer application

pub mod options;
pub mod run;
