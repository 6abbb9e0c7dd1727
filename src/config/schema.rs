//! Configuration schema definitions for teres.
//!
//! All sections are optional; every field has a default so an empty file is
//! a valid configuration.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── RemoteConfig           - Delivery to the remote lab controller
//! │   └── RetryConfig        - Backoff for transient remote failures
//! └── LoggingConfig          - Local logging handler
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::record::Level;

/// Root configuration structure for teres.
///
/// # TOML Structure
///
/// ```toml
/// [remote]
/// result_level = "info"
/// task_log_name = "testout.log"
/// flush_delay_ms = 15000
///
/// [remote.retry]
/// max_retries = 3
///
/// [logging]
/// name = "teres"
/// result_level = "debug"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Remote delivery settings.
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Local logging handler settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Settings of the remote handler and its delivery worker.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `result_level` | `info` |
/// | `process_logs` | true |
/// | `task_log_name` | `testout.log` |
/// | `task_log_dir` | system temp dir |
/// | `disable_subtasks` | false |
/// | `flush_delay_ms` | 15000 |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteConfig {
    /// Records below this level are not sent.
    #[serde(default = "default_result_level")]
    pub result_level: Level,

    /// Whether file attachments are sent at all.
    #[serde(default = "default_true")]
    pub process_logs: bool,

    /// Name of the test log that result lines are appended to.
    #[serde(default = "default_task_log_name")]
    pub task_log_name: String,

    /// Directory for the local copy of the task log.
    #[serde(default = "default_temp_dir")]
    pub task_log_dir: PathBuf,

    /// Treat `SUBTASK_RESULT` records as plain log lines.
    #[serde(default)]
    pub disable_subtasks: bool,

    /// Interval between periodic flushes of buffered log text, in
    /// milliseconds. Zero disables periodic flushing.
    #[serde(default = "default_flush_delay_ms")]
    pub flush_delay_ms: u64,

    /// Backoff for transient remote failures.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl RemoteConfig {
    pub fn flush_delay(&self) -> Duration {
        Duration::from_millis(self.flush_delay_ms)
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            result_level: default_result_level(),
            process_logs: true,
            task_log_name: default_task_log_name(),
            task_log_dir: default_temp_dir(),
            disable_subtasks: false,
            flush_delay_ms: default_flush_delay_ms(),
            retry: RetryConfig::default(),
        }
    }
}

/// Retry policy for remote calls.
///
/// A call is attempted once and then retried up to `max_retries` times,
/// waiting `min_delay_ms`, then `factor` times longer each time, capped at
/// `max_delay_ms`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_factor")]
    pub factor: f32,

    /// Randomize delays.
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            factor: default_factor(),
            jitter: false,
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> backon::ExponentialBuilder {
        let builder = backon::ExponentialBuilder::new()
            .with_max_times(self.max_retries)
            .with_factor(self.factor)
            .with_min_delay(Duration::from_millis(self.min_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms));

        if self.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }
}

/// Settings of the local logging handler.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Handler name; prefix of its log directory.
    #[serde(default = "default_logging_name")]
    pub name: String,

    /// Directory the handler's log directory is created in.
    #[serde(default = "default_temp_dir")]
    pub dest: PathBuf,

    #[serde(default = "default_result_level")]
    pub result_level: Level,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            name: default_logging_name(),
            dest: default_temp_dir(),
            result_level: default_result_level(),
        }
    }
}

fn default_result_level() -> Level {
    Level::Info
}

fn default_true() -> bool {
    true
}

fn default_task_log_name() -> String {
    "testout.log".to_string()
}

fn default_temp_dir() -> PathBuf {
    std::env::temp_dir()
}

fn default_flush_delay_ms() -> u64 {
    15_000
}

fn default_max_retries() -> usize {
    3
}

fn default_min_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    5_000
}

fn default_factor() -> f32 {
    2.0
}

fn default_logging_name() -> String {
    "teres".to_string()
}
