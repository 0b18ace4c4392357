use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

static LOGGER_INIT: OnceLock<()> = OnceLock::new();

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the default `info` filter.
pub fn init() {
    LOGGER_INIT.get_or_init(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_target(false)
            .init();
    });
}
