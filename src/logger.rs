//! Logging setup for the replay binary.
//!
//! Library code only emits `tracing` events; installing a subscriber is left
//! to the executable.

use tracing::Level;

/// Install the fmt subscriber with `info` as the default level.
///
/// `RUST_LOG` overrides the default, e.g. `RUST_LOG=mono_slam=debug`.
pub fn init_logger() {
    init_logger_with_level(Level::INFO)
}

pub fn init_logger_with_level(default_level: Level) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_target(true)
        .with_thread_names(true)
        .init();
}
