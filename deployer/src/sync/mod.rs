//! Values document synchronization

pub mod synchronizer;
