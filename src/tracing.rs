//! Tracing (logging)

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log filter used when `RUST_LOG` is not set.
///
/// Request and response events come from tower_http at debug level.
pub const DEFAULT_LOG_FILTER: &str = "ref_backend=info,tower_http=debug";

/// Initialise tracing (logging)
///
/// Events are formatted to stdout, filtered by `RUST_LOG` or else [DEFAULT_LOG_FILTER].
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
