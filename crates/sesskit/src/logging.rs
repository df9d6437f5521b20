//! Logging setup for binaries built on sesskit.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Installs a global fmt subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_level` is used as the
/// filter directive (`"info"`, `"sesskit_session=debug"`, ...). Calling
/// it twice is harmless: the second call leaves the first subscriber in
/// place.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init();
}
