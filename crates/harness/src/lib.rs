pub mod collaborators;
pub mod site;

pub use collaborators::{FailingActivityLog, FailingSearchIndex, RecordingSearchIndex};
pub use site::{MINUTE_MS, TestSite};

use tracing_subscriber::EnvFilter;

/// Install a test-friendly subscriber filtered by `RUST_LOG` (default
/// `warn`). Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
