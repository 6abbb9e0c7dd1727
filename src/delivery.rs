//! Asynchronous delivery of records to a remote client.
//!
//! Producers push commands onto a [`DeliveryQueue`]; a single [`Worker`]
//! running on its own thread drains the queue in order, routes each record
//! and drives the [`RemoteClient`](crate::remote::RemoteClient). The worker
//! owns all routing state, so nothing on that path needs locking.
//!
//! # Architecture
//!
//! ```text
//!   producer threads                      delivery thread
//!  ─────────────────                     ─────────────────────────────────
//!   Reporter::log ──► DeliveryQueue ───► Worker::run
//!                     (unbounded, FIFO)     │  dequeue()
//!                                           │  route(&RoutingState, &Record)
//!                                           │  RemoteClient calls (with retry)
//!                                           │
//!                     FlushTimer ─────────► │  flush log buffers between dequeues
//!                                           ▼
//!   end() ─► close queue ─► Draining ─► DrainComplete ─► final flush ─► Stopped
//! ```
//!
//! # Worker States
//!
//! | State | Meaning |
//! |-------|---------|
//! | `Running` | Processing records as they arrive |
//! | `Draining` | End of test seen; finishing what is queued |
//! | `Stopped` | Queue empty, buffers flushed; terminal |

pub mod flush;
pub mod queue;
pub mod retry;
pub mod router;
pub mod upload;
pub mod worker;

use std::fmt;

use crate::error::ReportError;

pub use flush::{FlushTimer, LogBuffers};
pub use queue::{Command, DeliveryQueue, Dequeued, QueueReceiver, delivery_queue};
pub use router::{Routed, RoutingState, route};
pub use upload::{UploadPlan, UploadTracker};
pub use worker::{Worker, WorkerHandle, spawn_worker};

/// Lifecycle state of the delivery worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Running => "running",
            WorkerState::Draining => "draining",
            WorkerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// A record (or buffered log text) that could not be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    /// Sequence number of the failed record; `None` for log text lost
    /// during the final flush.
    pub seq: Option<u64>,
    pub error: ReportError,
}

/// Outcome of a reporting session, available once the worker stopped.
///
/// Lets the final exit status of a test run tell reporting failures apart
/// from test failures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliverySummary {
    /// Records delivered successfully.
    pub delivered: usize,
    /// Everything that could not be delivered, in the order it failed.
    pub failures: Vec<DeliveryFailure>,
}

impl DeliverySummary {
    /// Returns `true` if every record reached the remote side.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn undelivered(&self) -> usize {
        self.failures.len()
    }

    /// Adds the counts of another session.
    pub fn merge(&mut self, other: DeliverySummary) {
        self.delivered += other.delivered;
        self.failures.extend(other.failures);
    }

    pub(crate) fn record_failure(&mut self, seq: Option<u64>, error: ReportError) {
        self.failures.push(DeliveryFailure { seq, error });
    }
}
