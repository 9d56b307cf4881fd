//! Tracing subscriber setup for the command-line front end

use std::io;

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, prelude::*, registry, EnvFilter};

/// Filter used when RUST_LOG is unset: `level` for this crate, warn elsewhere
fn default_directives(level: &str) -> String {
    format!("warn,palette_studio={level}")
}

/// Install the global fmt subscriber, writing to stderr so stdout stays
/// clean for command output.
///
/// RUST_LOG overrides `level`. Fails if a subscriber is already installed.
pub fn init(level: &str) -> Result<(), TryInitError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let stderr_layer = fmt::layer()
        .with_timer(fmt::time::ChronoUtc::new("%Y-%m-%d %H:%M:%S%.3f".to_string()))
        .with_level(true)
        .with_target(true)
        .with_ansi(cfg!(not(test)))
        .with_writer(io::stderr);

    registry().with(env_filter).with(stderr_layer).try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_parse() {
        let directives = default_directives("debug");
        assert_eq!(directives, "warn,palette_studio=debug");
        assert!(EnvFilter::try_new(directives).is_ok());
    }
}
