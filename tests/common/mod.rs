//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::path::PathBuf;

use akh_reasoner::storage::{Handles, MemoryStorage};
use tracing_subscriber::EnvFilter;

/// Route reasoner logs to the test output. `RUST_LOG` overrides the
/// default `warn` level.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn load_fixture(name: &str) -> (MemoryStorage, Handles) {
    init_tracing();
    MemoryStorage::load(&fixture_path(name)).unwrap()
}
