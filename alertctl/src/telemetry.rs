//! Telemetry initialization (tracing fmt subscriber with env-filter).
//!
//! Log verbosity is controlled via `RUST_LOG` (e.g. `RUST_LOG=alertctl=debug,info`);
//! without it the subscriber defaults to `info`.

use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// Safe to call more than once; subsequent calls are no-ops (useful in tests
/// where several cases may race to install a subscriber).
pub fn init_telemetry() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let initialized = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok();

    if initialized {
        info!("Telemetry initialized");
    }

    Ok(())
}
