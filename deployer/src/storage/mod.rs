//! Local and remote storage

pub mod blob;
pub mod layout;
pub mod memory;
pub mod settings;
