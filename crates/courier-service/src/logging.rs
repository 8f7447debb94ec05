use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "courier_db=info,courier_service=info";

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the
/// default filter. Fails if a subscriber is already installed.
pub fn init() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into()),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {}", e))
}
