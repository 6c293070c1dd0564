//! Chart installer invocation

pub mod commands;
pub mod installer;
