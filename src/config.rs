//! Configuration loading and schema definitions for teres.
//!
//! Configuration is read from TOML. Discovering where that file lives (or
//! reading lab environment variables) is left to the embedding test harness.

pub mod schema;

pub use schema::*;

use std::path::Path;

use anyhow::{Context, Result};

/// Loads teres configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or does not match the
/// schema.
///
/// # Example
///
/// ```no_run
/// use teres::config::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("teres.toml"))?;
/// println!("Flush every {:?}", config.remote.flush_delay());
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Loads teres configuration from a TOML string.
///
/// # Example
///
/// ```
/// use teres::config::load_config_str;
/// use teres::Level;
///
/// let config = load_config_str(r#"
///     [remote]
///     result_level = "pass"
///     flush_delay_ms = 500
/// "#)?;
///
/// assert_eq!(config.remote.result_level, Level::Pass);
/// assert_eq!(config.remote.task_log_name, "testout.log");
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Level;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = load_config_str("").unwrap();
        assert_eq!(config.remote.result_level, Level::Info);
        assert!(config.remote.process_logs);
        assert!(!config.remote.disable_subtasks);
        assert_eq!(config.remote.flush_delay(), Duration::from_secs(15));
        assert_eq!(config.remote.retry.max_retries, 3);
        assert_eq!(config.logging.name, "teres");
    }

    #[test]
    fn test_retry_section() {
        let config = load_config_str(
            r#"
            [remote.retry]
            max_retries = 5
            min_delay_ms = 10
            jitter = true
            "#,
        )
        .unwrap();
        assert_eq!(config.remote.retry.max_retries, 5);
        assert_eq!(config.remote.retry.min_delay_ms, 10);
        assert_eq!(config.remote.retry.max_delay_ms, 5_000);
        assert!(config.remote.retry.jitter);
    }

    #[test]
    fn test_invalid_level_rejected() {
        let result = load_config_str(
            r#"
            [remote]
            result_level = "loud"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nname = \"suite\"\nresult_level = \"debug\"").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.logging.name, "suite");
        assert_eq!(config.logging.result_level, Level::Debug);
    }

    #[test]
    fn test_missing_file_has_context() {
        let err = load_config(Path::new("/nonexistent/teres.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
