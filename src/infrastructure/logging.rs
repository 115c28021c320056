//! Logging configuration
//!
//! Initializes tracing for the application.

use tracing_subscriber::{EnvFilter, fmt};

/// Initializes logging at `level`; `RUST_LOG` takes precedence
///
/// Returns false if a global subscriber was already installed.
pub fn init_logging(level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_twice() {
        init_logging("debug");
        assert!(!init_logging("not a level [["));
    }
}
