//! Tracing initialization.
//!
//! Installs a `tracing-subscriber` registry with console output. The filter is read from
//! `RUST_LOG` and defaults to `info`, e.g.:
//!
//! ```bash
//! export RUST_LOG="closeio=debug,tower_http=info"
//! ```

use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize tracing with an env filter and a fmt layer.
///
/// Fails if a global subscriber is already installed.
pub fn init_telemetry() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    info!("Telemetry initialized");
    Ok(())
}
