//! Structured logging setup.

use std::sync::OnceLock;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingSettings;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the configured level. Safe to call more than once;
/// an already-installed subscriber is left in place.
pub fn init_logging(settings: &LoggingSettings) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&settings.level));

        let registry = tracing_subscriber::registry().with(filter);
        let installed = if settings.json {
            registry
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .try_init()
        } else {
            registry
                .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
                .try_init()
        };

        if installed.is_err() {
            tracing::debug!("global tracing subscriber already initialized");
        }
    });
}
