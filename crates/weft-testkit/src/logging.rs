//! Test log output

use tracing_subscriber::EnvFilter;

/// Route engine logs to the test harness, filtered by `RUST_LOG` (default `warn`)
///
/// Safe to call from every test; only the first call installs a subscriber.
pub fn init_test_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
