//! teres: non-blocking test result reporting.
//!
//! Tests report results and attach log files through a [`Reporter`]. The
//! remote handler never talks to the lab controller on the caller's thread:
//! records go onto a queue and a dedicated delivery worker sends them, in
//! order, with retries.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Record**: one reporting event with its [`Level`] and [`Flags`]
//! - **Report**: the [`Reporter`] facade and its [`Handler`]s
//! - **Delivery**: queue, router and worker behind [`RemoteHandler`]
//! - **Remote**: the [`RemoteClient`] capability and its implementations
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use teres::config::load_config;
//! use teres::remote::DirectoryClient;
//! use teres::{Flags, Level, LogSource, RemoteHandler, Reporter};
//!
//! fn main() -> anyhow::Result<()> {
//!     teres::telemetry::init_logging(false)?;
//!     let config = load_config(std::path::Path::new("teres.toml"))?;
//!     let client = DirectoryClient::new("/var/tmp/results");
//!
//!     let reporter = Reporter::builder()
//!         .with_handler(RemoteHandler::new(config.remote, Arc::new(client))?)
//!         .build();
//!
//!     reporter.log_info("starting")?;
//!     reporter.log(Level::Pass, "ping", Flags::new().subtask_result_at("/ping").score(0))?;
//!     reporter.send_file(LogSource::path("/var/log/messages"), None, None, Flags::new())?;
//!
//!     let summary = reporter.end()?;
//!     if !summary.is_clean() {
//!         eprintln!("{} records were not delivered", summary.undelivered());
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod delivery;
pub mod error;
pub mod record;
pub mod remote;
pub mod report;
pub mod telemetry;

// Re-export commonly used types
pub use config::{Config, load_config};
pub use delivery::DeliverySummary;
pub use error::{ReportError, ReportResult};
pub use record::{Flags, Level, LogSource, Record};
pub use remote::RemoteClient;
pub use report::{Handler, LoggingHandler, RemoteHandler, Reporter};
