// Process-wide structured logging.
//
// A thin wrapper over `tracing_subscriber::fmt`. Safe to call more than
// once (e.g. from multiple integration tests in the same binary); only
// the first call wins.

use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize the process-wide tracing subscriber.
pub fn init() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        let _ = tracing_subscriber::fmt()
            .with_target(false)
            .with_thread_ids(true)
            .with_level(true)
            .with_env_filter(filter)
            .try_init();
    });
}
