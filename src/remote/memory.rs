//! In-memory remote client.
//!
//! [`MemoryClient`] records every successful call in the order it was made
//! and can be told to fail upcoming calls. Clones share the same state, so a
//! test can hand one clone to a reporter and inspect the other.
//!
//! # Example
//!
//! ```
//! use teres::remote::{MemoryClient, RemoteError, RemoteOp};
//!
//! let client = MemoryClient::new();
//! client.fail_next(RemoteOp::UploadFile, RemoteError::Transient("503".into()), 2);
//! assert!(client.calls().is_empty());
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::{
    Destination, DestinationId, RemoteClient, RemoteError, RemoteOp, RemoteResult, ResultEntry,
    ResultHandle,
};

/// A call made against a [`MemoryClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    CreateSubtask {
        path: Option<String>,
        id: DestinationId,
    },
    CreateResult {
        destination: Destination,
        entry: ResultEntry,
    },
    AppendLog {
        destination: Destination,
        text: String,
    },
    UploadFile {
        destination: Destination,
        name: String,
        offset: u64,
        data: Vec<u8>,
    },
}

impl RemoteCall {
    pub fn op(&self) -> RemoteOp {
        match self {
            RemoteCall::CreateSubtask { .. } => RemoteOp::CreateSubtask,
            RemoteCall::CreateResult { .. } => RemoteOp::CreateResult,
            RemoteCall::AppendLog { .. } => RemoteOp::AppendLog,
            RemoteCall::UploadFile { .. } => RemoteOp::UploadFile,
        }
    }

    /// Destination the call acted on, if any.
    pub fn destination(&self) -> Option<&Destination> {
        match self {
            RemoteCall::CreateSubtask { .. } => None,
            RemoteCall::CreateResult { destination, .. }
            | RemoteCall::AppendLog { destination, .. }
            | RemoteCall::UploadFile { destination, .. } => Some(destination),
        }
    }
}

#[derive(Default)]
struct MemoryState {
    calls: Vec<RemoteCall>,
    attempts: HashMap<RemoteOp, usize>,
    failures: HashMap<RemoteOp, VecDeque<RemoteError>>,
    next_subtask: u64,
}

/// Remote client keeping everything in memory.
#[derive(Clone, Default)]
pub struct MemoryClient {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // A panic while holding the lock cannot leave the call log half-written.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes the next `times` calls of `op` fail with `error`.
    pub fn fail_next(&self, op: RemoteOp, error: RemoteError, times: usize) {
        let mut state = self.lock();
        let queue = state.failures.entry(op).or_default();
        queue.extend(std::iter::repeat_n(error, times));
    }

    /// Successful calls, in the order they were made.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().calls.clone()
    }

    /// Number of times `op` was attempted, failed attempts included.
    pub fn attempts(&self, op: RemoteOp) -> usize {
        self.lock().attempts.get(&op).copied().unwrap_or(0)
    }

    /// All text appended to a destination's log.
    pub fn log_text(&self, destination: &Destination) -> String {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                RemoteCall::AppendLog {
                    destination: d,
                    text,
                } if d == destination => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Current content of an uploaded file, with offsets applied.
    pub fn file_content(&self, destination: &Destination, name: &str) -> Option<Vec<u8>> {
        let state = self.lock();
        let mut content: Option<Vec<u8>> = None;
        for call in &state.calls {
            if let RemoteCall::UploadFile {
                destination: d,
                name: n,
                offset,
                data,
            } = call
                && d == destination
                && n == name
            {
                let file = content.get_or_insert_with(Vec::new);
                file.truncate(*offset as usize);
                file.extend_from_slice(data);
            }
        }
        content
    }

    /// Total number of bytes uploaded for a file across all calls.
    pub fn uploaded_bytes(&self, destination: &Destination, name: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                RemoteCall::UploadFile {
                    destination: d,
                    name: n,
                    data,
                    ..
                } if d == destination && n == name => Some(data.len()),
                _ => None,
            })
            .sum()
    }

    fn attempt(&self, op: RemoteOp) -> RemoteResult<MutexGuard<'_, MemoryState>> {
        let mut state = self.lock();
        *state.attempts.entry(op).or_insert(0) += 1;
        if let Some(error) = state.failures.get_mut(&op).and_then(|q| q.pop_front()) {
            return Err(error);
        }
        Ok(state)
    }
}

#[async_trait]
impl RemoteClient for MemoryClient {
    async fn create_subtask(&self, path: Option<&str>) -> RemoteResult<DestinationId> {
        let mut state = self.attempt(RemoteOp::CreateSubtask)?;
        state.next_subtask += 1;
        let id = DestinationId::new(format!("result-{}", state.next_subtask));
        state.calls.push(RemoteCall::CreateSubtask {
            path: path.map(str::to_string),
            id: id.clone(),
        });
        Ok(id)
    }

    async fn create_result(
        &self,
        destination: &Destination,
        entry: &ResultEntry,
    ) -> RemoteResult<ResultHandle> {
        let mut state = self.attempt(RemoteOp::CreateResult)?;
        state.calls.push(RemoteCall::CreateResult {
            destination: destination.clone(),
            entry: entry.clone(),
        });
        Ok(ResultHandle(format!("{}#{}", destination, state.calls.len())))
    }

    async fn append_log(&self, destination: &Destination, text: &str) -> RemoteResult<()> {
        let mut state = self.attempt(RemoteOp::AppendLog)?;
        state.calls.push(RemoteCall::AppendLog {
            destination: destination.clone(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn upload_file(
        &self,
        destination: &Destination,
        name: &str,
        offset: u64,
        data: &[u8],
    ) -> RemoteResult<()> {
        let mut state = self.attempt(RemoteOp::UploadFile)?;
        state.calls.push(RemoteCall::UploadFile {
            destination: destination.clone(),
            name: name.to_string(),
            offset,
            data: data.to_vec(),
        });
        Ok(())
    }
}
