//! Tracing initialization.
//!
//! Console output via the `tracing-subscriber` fmt layer, filtered through `RUST_LOG`
//! (default `info`). For example, to see every dispatcher decision:
//!
//! ```bash
//! RUST_LOG=authgate=trace authgate -f config.yaml
//! ```

use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize tracing with an env-driven filter and console output.
pub fn init_telemetry() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    info!("Telemetry initialized");
    Ok(())
}
