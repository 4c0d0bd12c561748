//! Logging bootstrap
//!
//! Structured `tracing` output for the host binary. Library code only emits
//! events; installing a subscriber is the binary's job.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

const DEFAULT_FILTER: &str = "chart_agency=info,tower_http=info";

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
pub fn init_logging() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    Registry::default()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set tracing subscriber: {}", e))
}
