//! Process-wide `tracing` setup.

use anyhow::{Result, anyhow};
use tracing_subscriber::EnvFilter;

/// Installs a formatted `tracing` subscriber.
///
/// A valid `RUST_LOG` takes precedence; otherwise teres logs at `info`, or
/// `debug` when `verbose` is set.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(verbose: bool) -> Result<()> {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        // The first call may fail too if another test got there first.
        let _ = init_logging(false);
        assert!(init_logging(true).is_err());
    }
}
