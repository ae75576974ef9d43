//! Log categories and subscriber setup
//!
//! The library only emits `tracing` events; nothing is printed unless the
//! binary installs a subscriber through [`init`].

use tracing_subscriber::EnvFilter;

/// Store reads and writes
pub const PERSISTENCE: &str = "persistence";
/// Queue scheduling and state transitions
pub const DOWNLOAD: &str = "download";
/// Byte transfer and HTTP traffic
pub const NETWORK: &str = "network";
/// Process lifecycle and the web API
pub const APPLICATION: &str = "application";

/// Install the global fmt subscriber.
///
/// `RUST_LOG` wins over `default_level` when set.
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
