//! Shared tracing setup for integration tests.
//!
//! Set `RUST_LOG=relcache_store=debug` to see write and propagation events.

use tracing_subscriber::EnvFilter;

/// Install a test-friendly subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
