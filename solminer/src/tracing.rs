//! Tracing setup and the macro prelude used throughout the crate.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

pub mod prelude {
    pub use tracing::{debug, error, info, trace, warn};
}

/// Initialize the global subscriber.
///
/// Filter comes from `SOLMINER_LOG` (falling back to `info`). A
/// journald layer is attached when the socket is available; stderr
/// fmt output is always on.
pub fn init() {
    let filter = EnvFilter::try_from_env("SOLMINER_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true));

    match tracing_journald::layer() {
        Ok(journald) => registry.with(journald).init(),
        Err(_) => registry.init(),
    }
}
