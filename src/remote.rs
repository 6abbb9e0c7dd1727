//! Remote client capability used by the delivery worker.
//!
//! The delivery worker never talks to the network itself; it drives a
//! [`RemoteClient`], which performs the actual calls against the lab
//! controller (or whatever plays that role). Only the method contracts
//! matter here, not the transport.
//!
//! ```text
//!  Worker ──► RemoteClient
//!               create_subtask(path)            -> DestinationId
//!               create_result(dest, entry)      -> ResultHandle
//!               append_log(dest, text)
//!               upload_file(dest, name, offset, bytes)
//! ```
//!
//! # Built-in Clients
//!
//! | Client | Module | Description |
//! |--------|--------|-------------|
//! | Memory | [`memory`] | Records every call in order, supports failure injection |
//! | Directory | [`directory`] | Mirrors destinations into a local directory tree |
//!
//! # Error Handling
//!
//! Clients classify failures as [`RemoteError::Transient`] (timeouts, 5xx,
//! anything that may succeed on retry) or [`RemoteError::Permanent`]. The
//! worker retries transient errors with backoff and gives up immediately on
//! permanent ones.

pub mod directory;
pub mod memory;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ReportError;
use crate::record::Level;

pub use directory::DirectoryClient;
pub use memory::{MemoryClient, RemoteCall};

/// Result type for remote operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors returned by a [`RemoteClient`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// May succeed if the call is repeated (timeouts, server errors).
    #[error("Transient remote failure: {0}")]
    Transient(String),

    /// Will not succeed on retry (rejected request, unknown destination).
    #[error("Remote failure: {0}")]
    Permanent(String),
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }
}

impl From<RemoteError> for ReportError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::Transient(msg) => ReportError::TransientRemote(msg),
            RemoteError::Permanent(msg) => ReportError::PermanentRemote(msg),
        }
    }
}

/// Identity of a subtask created on the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DestinationId(String);

impl DestinationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A remote entity receiving results, log text and files.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Destination {
    /// The running task itself.
    Task,
    /// A subtask result created during the test.
    Subtask(DestinationId),
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Task => f.write_str("task"),
            Destination::Subtask(id) => write!(f, "subtask {}", id),
        }
    }
}

/// A result posted to a destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultEntry {
    pub level: Level,
    pub message: String,
    pub score: Option<i64>,
    pub path: Option<String>,
}

impl ResultEntry {
    /// Result name as the lab controller expects it.
    pub fn remote_result(&self) -> &'static str {
        self.level.remote_result()
    }
}

/// Handle of a posted result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResultHandle(pub String);

/// Remote operations, used to label failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    CreateSubtask,
    CreateResult,
    AppendLog,
    UploadFile,
}

impl fmt::Display for RemoteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RemoteOp::CreateSubtask => "create_subtask",
            RemoteOp::CreateResult => "create_result",
            RemoteOp::AppendLog => "append_log",
            RemoteOp::UploadFile => "upload_file",
        };
        f.write_str(name)
    }
}

/// Capability performing the calls against the remote system.
///
/// Implementations are driven by a single delivery worker: calls never
/// overlap and arrive in the order records were reported.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Creates a subtask result entry and returns its identity.
    async fn create_subtask(&self, path: Option<&str>) -> RemoteResult<DestinationId>;

    /// Posts a result to a destination.
    async fn create_result(
        &self,
        destination: &Destination,
        entry: &ResultEntry,
    ) -> RemoteResult<ResultHandle>;

    /// Appends text to the destination's test log.
    async fn append_log(&self, destination: &Destination, text: &str) -> RemoteResult<()>;

    /// Writes `data` into the named file of a destination, starting at
    /// `offset`. An offset of zero replaces the file.
    async fn upload_file(
        &self,
        destination: &Destination,
        name: &str,
        offset: u64,
        data: &[u8],
    ) -> RemoteResult<()>;
}
