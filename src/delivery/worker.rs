//! The delivery worker.
//!
//! One [`Worker`] per reporting session. It runs on a dedicated thread with
//! its own current-thread runtime, so producers never share an executor with
//! remote I/O and the worker never needs locks around its state.

use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::flush::{FlushTimer, LogBuffers};
use super::queue::{Command, Dequeued, QueueReceiver};
use super::retry::call_with_retry;
use super::router::{Routed, RoutingState, route};
use super::upload::{UploadPlan, UploadTracker};
use super::{DeliverySummary, WorkerState};
use crate::config::RemoteConfig;
use crate::error::{ReportError, ReportResult};
use crate::record::{Record, RecordKind};
use crate::remote::{Destination, DestinationId, RemoteClient, RemoteOp, ResultEntry};

/// Consumes the delivery queue and performs every remote call.
pub struct Worker {
    client: Arc<dyn RemoteClient>,
    config: RemoteConfig,
    routing: RoutingState,
    buffers: LogBuffers,
    uploads: UploadTracker,
    summary: DeliverySummary,
    state: watch::Sender<WorkerState>,
}

impl Worker {
    /// Creates a worker in the `Running` state and a receiver observing its
    /// state.
    pub fn new(
        client: Arc<dyn RemoteClient>,
        config: RemoteConfig,
    ) -> (Self, watch::Receiver<WorkerState>) {
        let (state, state_rx) = watch::channel(WorkerState::Running);
        let buffers = LogBuffers::with_mirror(&config.task_log_dir, &config.task_log_name);

        let worker = Self {
            client,
            config,
            routing: RoutingState::new(),
            buffers,
            uploads: UploadTracker::new(),
            summary: DeliverySummary::default(),
            state,
        };
        (worker, state_rx)
    }

    pub fn routing(&self) -> &RoutingState {
        &self.routing
    }

    /// Path of the local copy of the task log, if one could be created.
    pub fn mirror_path(&self) -> Option<std::path::PathBuf> {
        self.buffers.mirror_path()
    }

    /// Processes commands until the queue is closed and empty, then flushes
    /// the log buffers one last time.
    pub async fn run(mut self, mut queue: QueueReceiver) -> DeliverySummary {
        let mut timer = FlushTimer::new(self.config.flush_delay());

        loop {
            tokio::select! {
                dequeued = queue.dequeue() => match dequeued {
                    Dequeued::Command(command) => self.handle(command).await,
                    Dequeued::DrainComplete => break,
                },
                _ = timer.tick(), if self.buffers.is_dirty() => {
                    debug!("Periodic flush");
                    self.flush(false).await;
                }
            }
        }

        self.flush(true).await;
        self.set_state(WorkerState::Stopped);
        info!(
            "Delivery finished: {} delivered, {} undelivered",
            self.summary.delivered,
            self.summary.undelivered()
        );
        self.summary
    }

    fn set_state(&self, state: WorkerState) {
        self.state.send_replace(state);
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Deliver(record) => {
                let seq = record.seq();
                debug!("Delivering record {} ({})", seq, record.level());
                match self.deliver(&record).await {
                    Ok(()) => self.summary.delivered += 1,
                    Err(e) => {
                        warn!("Record {} not delivered: {}", seq, e);
                        self.summary.record_failure(Some(seq), e);
                    }
                }
            }
            Command::Flush => self.flush(false).await,
            Command::ResetDefault => {
                debug!("Default destination reset to the task");
                self.routing.reset_default();
            }
            Command::Drain => {
                info!("End of test, draining delivery queue");
                self.set_state(WorkerState::Draining);
            }
        }
    }

    async fn deliver(&mut self, record: &Record) -> ReportResult<()> {
        let request = record.flags().subtask_request();
        let creates_subtask = request.is_some() && !self.config.disable_subtasks;

        let subtask = match request {
            Some(request) if creates_subtask => {
                let id = self.create_subtask(request.path.as_deref()).await?;
                debug!("Created {}", id);
                self.routing.open_subtask(id.clone());
                Some(id)
            }
            _ => None,
        };

        let routed = if request.is_some() && !creates_subtask {
            Routed::to(self.routing.default_destination().clone())
        } else {
            route(&self.routing, record)?
        };
        self.routing.apply(&routed);

        match record.kind() {
            RecordKind::Log => self.deliver_log(record, &routed.destination, subtask).await,
            RecordKind::File => self.deliver_file(record, &routed.destination).await,
        }
    }

    async fn deliver_log(
        &mut self,
        record: &Record,
        destination: &Destination,
        subtask: Option<DestinationId>,
    ) -> ReportResult<()> {
        if let Some(line) = record.formatted() {
            self.buffers.append(destination, &format!("{}\n", line));
        }

        let Some(id) = subtask else {
            return Ok(());
        };

        let entry = ResultEntry {
            level: record.level(),
            message: record.message().unwrap_or_default().to_string(),
            score: record.flags().score_value(),
            path: record
                .flags()
                .subtask_request()
                .and_then(|request| request.path.clone()),
        };
        let target = Destination::Subtask(id);

        let client = self.client.as_ref();
        let (d, e) = (&target, &entry);
        call_with_retry(&self.config.retry, RemoteOp::CreateResult, move || {
            client.create_result(d, e)
        })
        .await?;
        Ok(())
    }

    async fn deliver_file(&mut self, record: &Record, destination: &Destination) -> ReportResult<()> {
        if let Some(line) = record.formatted() {
            self.buffers.append(destination, &format!("{}\n", line));
        }

        let (Some(source), Some(name)) = (record.source(), record.name()) else {
            return Err(ReportError::Configuration(format!(
                "record {} has no attachment",
                record.seq()
            )));
        };

        let content = source
            .read_all()
            .map_err(|e| ReportError::Io(format!("cannot read {:?}: {}", source, e)))?;

        let plan = self
            .uploads
            .plan(destination, name, &content, record.flags().is_reupload());
        let offset = match plan {
            UploadPlan::Skip => {
                debug!("{} did not grow on {}, not uploading", name, destination);
                return Ok(());
            }
            UploadPlan::Append { offset } => offset,
            UploadPlan::Replace => 0,
        };

        let client = self.client.as_ref();
        let data = &content[offset as usize..];
        call_with_retry(&self.config.retry, RemoteOp::UploadFile, move || {
            client.upload_file(destination, name, offset, data)
        })
        .await?;

        debug!(
            "Uploaded {} bytes of {} to {} at offset {}",
            data.len(),
            name,
            destination,
            offset
        );
        self.uploads.record(destination, name, plan, &content);
        Ok(())
    }

    async fn create_subtask(&self, path: Option<&str>) -> ReportResult<DestinationId> {
        let client = self.client.as_ref();
        call_with_retry(&self.config.retry, RemoteOp::CreateSubtask, move || {
            client.create_subtask(path)
        })
        .await
    }

    /// Sends buffered text of every destination.
    ///
    /// Text that fails to go out stays buffered for the next flush, except on
    /// the final flush where it is counted as undelivered.
    async fn flush(&mut self, last: bool) {
        for (destination, text) in self.buffers.snapshot() {
            let client = self.client.as_ref();
            let (d, t) = (&destination, text.as_str());
            let result = call_with_retry(&self.config.retry, RemoteOp::AppendLog, move || {
                client.append_log(d, t)
            })
            .await;

            match result {
                Ok(()) => self.buffers.clear(&destination),
                Err(e) if last => {
                    warn!("Log text for {} lost: {}", destination, e);
                    self.summary.record_failure(None, e);
                    self.buffers.clear(&destination);
                }
                Err(e) => warn!("Flush to {} failed, keeping text: {}", destination, e),
            }
        }
    }
}

/// Handle to a worker running on its own thread.
pub struct WorkerHandle {
    thread: Option<JoinHandle<DeliverySummary>>,
    state: watch::Receiver<WorkerState>,
}

impl WorkerHandle {
    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// A receiver that sees every later state change.
    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.clone()
    }

    pub fn is_joined(&self) -> bool {
        self.thread.is_none()
    }

    /// Blocks until the worker thread exits and returns its summary.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Worker`] if the thread was already joined or
    /// panicked.
    pub fn join(&mut self) -> ReportResult<DeliverySummary> {
        let thread = self
            .thread
            .take()
            .ok_or_else(|| ReportError::Worker("delivery worker already joined".to_string()))?;

        thread
            .join()
            .map_err(|_| ReportError::Worker("delivery worker panicked".to_string()))
    }
}

/// Starts a worker on a new thread, consuming `queue`.
///
/// # Errors
///
/// Returns [`ReportError::Worker`] if the runtime or the thread cannot be
/// created.
pub fn spawn_worker(
    client: Arc<dyn RemoteClient>,
    config: RemoteConfig,
    queue: QueueReceiver,
) -> ReportResult<WorkerHandle> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| ReportError::Worker(format!("cannot build delivery runtime: {}", e)))?;

    let (worker, state) = Worker::new(client, config);

    let thread = std::thread::Builder::new()
        .name("teres-delivery".to_string())
        .spawn(move || runtime.block_on(worker.run(queue)))
        .map_err(|e| ReportError::Worker(format!("cannot start delivery thread: {}", e)))?;

    Ok(WorkerHandle {
        thread: Some(thread),
        state,
    })
}
