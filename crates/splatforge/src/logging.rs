//! Tracing subscriber setup.
//!
//! Output goes to stderr. `RUST_LOG` wins over the configured level. `log` records emitted by
//! dependencies are bridged into tracing through `tracing-log`.

use std::sync::OnceLock;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

static INIT: OnceLock<()> = OnceLock::new();

/// Builds the filter from `RUST_LOG`, falling back to the configured level.
pub fn build_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber. Calling it again is a no-op.
pub fn init(config: &LoggingConfig) {
    INIT.get_or_init(|| {
        if let Err(e) = tracing_log::LogTracer::init() {
            eprintln!("log bridge already installed: {}", e);
        }

        let registry = tracing_subscriber::registry().with(build_filter(config));
        let result = if config.json {
            tracing::subscriber::set_global_default(
                registry.with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_writer(std::io::stderr),
                ),
            )
        } else {
            tracing::subscriber::set_global_default(
                registry.with(fmt::layer().with_target(true).with_writer(std::io::stderr)),
            )
        };

        if let Err(e) = result {
            eprintln!("tracing subscriber already installed: {}", e);
        }
    });
}
