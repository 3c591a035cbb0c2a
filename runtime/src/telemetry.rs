//! Tracing bootstrap.

use crate::config::ObservabilityConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise `config.log_level` is used as the
/// filter. Calling this twice is harmless: the second call is ignored and
/// `false` is returned.
pub fn init_tracing(config: &ObservabilityConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init()
        .is_ok()
}
