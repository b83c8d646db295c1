//! Shared fixtures for deploygraph's integration tests: graph builders,
//! scripted executors and inventories, and tracing setup.

pub mod builders;
pub mod fake_executor;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// Wall-clock budget for runs that must never hang.
pub const RUN_BUDGET: Duration = Duration::from_secs(5);

/// Install a test-captured fmt subscriber once per test binary.
///
/// Filtering follows `RUST_LOG` (default `info`), e.g.
/// `RUST_LOG=deploygraph::engine=debug` to trace coordinator steps.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Await `f`, failing the test if it takes longer than [`RUN_BUDGET`].
///
/// Not for paused-time tests: auto-advance would fire the budget early.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(RUN_BUDGET, f).await {
        Ok(value) => value,
        Err(_) => panic!("run did not finish within {RUN_BUDGET:?}"),
    }
}
