//! Helm values document and its settings mapping

pub mod document;
pub mod keys;
pub mod mapper;
