//! Logging setup.
//!
//! All output goes to **stderr**: stdout carries the handshake line the host
//! reads. Filtering follows `RUST_LOG`, e.g.
//!
//! ```bash
//! # consistency probes and API calls
//! RUST_LOG=googleworkspace_provider=debug ./googleworkspace-provider
//!
//! # only the consistency loop
//! RUST_LOG=info,googleworkspace_provider::consistency=debug ./googleworkspace-provider
//! ```

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

fn stderr_layer<S>() -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
}

/// Install the stderr subscriber at `info` unless `RUST_LOG` says otherwise.
///
/// # Panics
///
/// Panics if a global subscriber is already installed.
pub fn init_logging() {
    init_logging_with_default("info");
}

/// Like [`init_logging`] with a different default level.
///
/// # Panics
///
/// Panics if a global subscriber is already installed.
pub fn init_logging_with_default(default_level: &str) {
    tracing_subscriber::registry()
        .with(filter(default_level))
        .with(stderr_layer())
        .init();
}

/// Install the subscriber if none is set yet. Returns whether it was installed.
pub fn try_init_logging() -> bool {
    tracing_subscriber::registry()
        .with(filter("info"))
        .with(stderr_layer())
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directives_parse() {
        assert!(EnvFilter::try_new("googleworkspace_provider=debug").is_ok());
        assert!(EnvFilter::try_new("info,googleworkspace_provider::consistency=debug").is_ok());
    }

    #[test]
    fn test_try_init_logging_twice() {
        let _ = try_init_logging();
        assert!(!try_init_logging());
    }
}
