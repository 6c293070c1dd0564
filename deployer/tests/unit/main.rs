//! Integration tests for the deployer library

mod test_executor;
mod test_sync_values;
mod test_values;
