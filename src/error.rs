//! Error types for reporting and delivery.
//!
//! Errors fall into two groups with different propagation rules:
//!
//! - **Synchronous** (`Configuration`, `Shutdown`): detected without any
//!   remote I/O and returned straight to the caller of the reporting API.
//! - **Delivery** (`DestinationNotFound`, `TransientRemote`,
//!   `PermanentRemote`): raised inside the delivery worker. They are isolated
//!   per record, logged, and collected into a
//!   [`DeliverySummary`](crate::delivery::DeliverySummary); they never reach
//!   the producer call that enqueued the record.

use crate::remote::DestinationId;

/// Result type for reporting operations.
pub type ReportResult<T> = Result<T, ReportError>;

/// Errors that can occur while reporting or delivering records.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReportError {
    /// A record was built with invalid or inconsistent flags.
    ///
    /// Examples: `SubtaskResult` without `Score`, a `Score` that is not an
    /// integer, a stream attachment without a name.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A flag referenced a subtask that was never created.
    #[error("Destination not found: {0}")]
    DestinationNotFound(String),

    /// A remote call failed in a way that may succeed on retry.
    #[error("Transient remote error: {0}")]
    TransientRemote(String),

    /// A remote call failed for good, or ran out of retries.
    #[error("Permanent remote error: {0}")]
    PermanentRemote(String),

    /// The reporting session already ended; nothing more can be enqueued.
    #[error("Reporting session has ended: {0}")]
    Shutdown(String),

    /// Local I/O failed (reading an attachment, writing a mirror file).
    #[error("IO error: {0}")]
    Io(String),

    /// The delivery worker could not be started or terminated abnormally.
    #[error("Delivery worker error: {0}")]
    Worker(String),
}

impl ReportError {
    /// Builds a `DestinationNotFound` error for an explicit subtask id.
    pub fn unknown_subtask(id: &DestinationId) -> Self {
        ReportError::DestinationNotFound(format!("subtask {} was never created", id))
    }

    /// Returns `true` if the error is raised synchronously to the producer.
    pub fn is_synchronous(&self) -> bool {
        matches!(self, ReportError::Configuration(_) | ReportError::Shutdown(_))
    }
}

impl From<std::io::Error> for ReportError {
    fn from(e: std::io::Error) -> Self {
        ReportError::Io(e.to_string())
    }
}
