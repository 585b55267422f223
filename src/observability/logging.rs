//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the `tracing` subscriber for binaries built on the client
//! - Resolve the log level: `RUST_LOG` first, then the configured level
//!
//! The library itself only emits events; it never installs a subscriber.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::schema::LoggingConfig;

/// Install a global fmt subscriber. Returns false if one was already set.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(&config.level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(config.show_target)
                .with_writer(std::io::stderr),
        )
        .try_init()
        .is_ok()
}

fn default_directive(level: &str) -> String {
    format!("stallguard={level},warn")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_scopes_level_to_crate() {
        assert_eq!(default_directive("debug"), "stallguard=debug,warn");
    }
}
