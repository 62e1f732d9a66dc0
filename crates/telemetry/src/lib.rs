//! Logging and tracing bootstrap.

use shelfswap_kernel::settings::{LogFormat, TelemetrySettings};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Build the filter: `RUST_LOG` wins, then the configured directive.
pub fn env_filter(settings: &TelemetrySettings) -> anyhow::Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&settings.filter).map_err(|e| {
            anyhow::anyhow!("invalid telemetry filter '{}': {}", settings.filter, e)
        }),
    }
}

/// Install the global subscriber.
///
/// Calling this twice is harmless: the second install is refused by
/// `tracing` and reported at debug level, which keeps tests and the CLI
/// free to call it unconditionally.
pub fn init(settings: &TelemetrySettings) -> anyhow::Result<()> {
    let filter = env_filter(settings)?;

    let installed = match settings.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_current_span(true))
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .try_init(),
    };

    match installed {
        Ok(()) => tracing::info!(
            target: "shelfswap-telemetry",
            format = ?settings.log_format,
            "telemetry initialized"
        ),
        Err(e) => tracing::debug!(
            target: "shelfswap-telemetry",
            error = %e,
            "subscriber already installed"
        ),
    }

    Ok(())
}
