//! Logging setup for the lie-kalman binaries and benchmarks
//!
//! Filters only emit `tracing` events: `debug!` when a step is rejected and
//! `trace!` for per-step diagnostics. Installing a subscriber is left to the
//! executable, which calls [`init_logger`] once at startup.

use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::SystemTime;

/// Install the default subscriber at INFO level.
///
/// # Example
/// ```no_run
/// use lie_kalman::init_logger;
///
/// init_logger();
/// tracing::info!("Localization started");
/// ```
///
/// `RUST_LOG` overrides the level, e.g.
/// ```bash
/// RUST_LOG=lie_kalman::filters=debug cargo run --bin se3_localization
/// ```
pub fn init_logger() {
    init_logger_with_level(Level::INFO)
}

/// Install the default subscriber with `default_level` unless `RUST_LOG` says otherwise.
///
/// Lines carry a timestamp, the level and the target module. A second call is
/// a no-op.
pub fn init_logger_with_level(default_level: Level) {
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(SystemTime)
        .with_target(true)
        .with_level(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_initialisation_is_harmless() {
        init_logger_with_level(Level::DEBUG);
        init_logger();
        tracing::debug!("subscriber installed");
    }
}
