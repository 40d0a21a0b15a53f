//! Structured logging setup.
//!
//! Logs go to **stderr**; stdout carries the handshake line and nothing else.
//!
//! The filter is taken from `RUST_LOG`, then from `SNOWFLAKE_PROVIDER_LOG`,
//! then from the default level passed in (`info` unless stated otherwise).
//!
//! ```bash
//! # Statement-level detail from the reconciler
//! RUST_LOG=snowflake_provider::reconciler=debug ./snowflake-provider
//!
//! # Same, when the host strips RUST_LOG from the plugin environment
//! SNOWFLAKE_PROVIDER_LOG=debug ./snowflake-provider
//! ```
//!
//! Sensitive attribute values never reach a log line: statements are logged
//! in their redacted form and values pass through [`Sensitive`](crate::value::Sensitive).

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Fallback filter variable, consulted when `RUST_LOG` is unset or invalid.
pub const LOG_ENV: &str = "SNOWFLAKE_PROVIDER_LOG";

const DEFAULT_LEVEL: &str = "info";

fn filter_from(
    lookup: impl Fn(&str) -> Option<String>,
    default_level: &str,
) -> EnvFilter {
    [EnvFilter::DEFAULT_ENV, LOG_ENV]
        .into_iter()
        .filter_map(|var| lookup(var))
        .find_map(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(default_level))
}

fn subscriber(default_level: &str) -> impl tracing::Subscriber + Send + Sync + 'static {
    tracing_subscriber::registry()
        .with(filter_from(|var| std::env::var(var).ok(), default_level))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false),
        )
}

/// Install the global subscriber at `info`.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging() {
    init_logging_with_default(DEFAULT_LEVEL);
}

/// Install the global subscriber with a custom default level.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging_with_default(default_level: &str) {
    subscriber(default_level).init();
}

/// Install the global subscriber unless one is already set.
///
/// Returns `false` if a subscriber was already installed.
pub fn try_init_logging() -> bool {
    subscriber(DEFAULT_LEVEL).try_init().is_ok()
}
