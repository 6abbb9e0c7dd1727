//! Handler delivering records to a remote lab controller.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use super::{Handler, lock};
use crate::config::RemoteConfig;
use crate::delivery::{
    Command, DeliveryQueue, DeliverySummary, WorkerHandle, WorkerState, delivery_queue,
    spawn_worker,
};
use crate::error::ReportResult;
use crate::record::{Level, Record};
use crate::remote::RemoteClient;

/// Enqueues records for a delivery worker that talks to a [`RemoteClient`].
///
/// Creating the handler starts the worker thread. [`end`](RemoteHandler::end)
/// (or [`close`](Handler::close)) drains the queue and waits for the worker;
/// it only does so in the process that created the handler.
pub struct RemoteHandler {
    result_level: Level,
    process_logs: bool,
    queue: DeliveryQueue,
    worker: Mutex<WorkerHandle>,
    summary: Mutex<Option<DeliverySummary>>,
    owner: AtomicU32,
}

impl RemoteHandler {
    /// Starts a delivery worker for `client`.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Worker`](crate::ReportError::Worker) if the
    /// worker thread cannot be started.
    pub fn new(config: RemoteConfig, client: Arc<dyn RemoteClient>) -> ReportResult<Self> {
        let result_level = config.result_level;
        let process_logs = config.process_logs;

        let (queue, receiver) = delivery_queue();
        let worker = spawn_worker(client, config, receiver)?;
        info!("Remote delivery worker started");

        Ok(Self {
            result_level,
            process_logs,
            queue,
            worker: Mutex::new(worker),
            summary: Mutex::new(None),
            owner: AtomicU32::new(std::process::id()),
        })
    }

    /// Current state of the delivery worker.
    pub fn worker_state(&self) -> WorkerState {
        lock(&self.worker).state()
    }

    /// Summary of the session, once it ended.
    pub fn summary(&self) -> Option<DeliverySummary> {
        lock(&self.summary).clone()
    }

    pub fn is_owner(&self) -> bool {
        self.owner.load(Ordering::SeqCst) == std::process::id()
    }

    /// Gives up ownership: ending and dropping no longer drain the worker.
    pub fn detach(&self) {
        self.owner.store(0, Ordering::SeqCst);
    }

    /// Closes the queue and blocks until the worker delivered everything
    /// and stopped.
    ///
    /// Later calls return the same summary. Outside the owning process this
    /// does nothing and returns an empty summary.
    pub fn end(&self) -> ReportResult<DeliverySummary> {
        if !self.is_owner() {
            debug!("Not the owning process, leaving the delivery worker alone");
            return Ok(DeliverySummary::default());
        }

        let mut summary = lock(&self.summary);
        if let Some(summary) = summary.as_ref() {
            return Ok(summary.clone());
        }

        self.queue.close();
        let result = lock(&self.worker).join()?;
        *summary = Some(result.clone());
        Ok(result)
    }
}

impl Handler for RemoteHandler {
    fn result_level(&self) -> Level {
        self.result_level
    }

    fn process_logs(&self) -> bool {
        self.process_logs
    }

    fn emit_log(&self, record: &Record) -> ReportResult<()> {
        self.queue.enqueue(Command::Deliver(record.clone()))
    }

    fn emit_file(&self, record: &Record) -> ReportResult<()> {
        self.queue.enqueue(Command::Deliver(record.clone()))
    }

    fn flush(&self) -> ReportResult<()> {
        self.queue.enqueue(Command::Flush)
    }

    fn reset_log_dest(&self) -> ReportResult<()> {
        self.queue.enqueue(Command::ResetDefault)
    }

    fn close(&self) -> ReportResult<DeliverySummary> {
        self.end()
    }
}

impl Drop for RemoteHandler {
    fn drop(&mut self) {
        if !self.is_owner() || lock(&self.summary).is_some() {
            return;
        }
        if let Err(e) = self.end() {
            warn!("Delivery worker did not stop cleanly: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::error::ReportError;
    use crate::record::{Flags, LogSource};
    use crate::remote::{Destination, MemoryClient, RemoteOp};
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> RemoteConfig {
        RemoteConfig {
            task_log_dir: dir.path().to_path_buf(),
            flush_delay_ms: 0,
            retry: RetryConfig {
                max_retries: 1,
                min_delay_ms: 1,
                max_delay_ms: 1,
                factor: 1.0,
                jitter: false,
            },
            ..RemoteConfig::default()
        }
    }

    fn record(seq: u64, level: Level, msg: &str) -> Record {
        Record::log(seq, level, msg, Flags::new()).unwrap()
    }

    #[test]
    fn test_end_drains_and_stops() {
        let dir = TempDir::new().unwrap();
        let client = MemoryClient::new();
        let handler = RemoteHandler::new(config(&dir), Arc::new(client.clone())).unwrap();

        for seq in 0..5 {
            handler.emit(&record(seq, Level::Info, &format!("line {}", seq))).unwrap();
        }
        let summary = handler.end().unwrap();

        assert_eq!(summary.delivered, 5);
        assert_eq!(handler.worker_state(), WorkerState::Stopped);
        assert_eq!(handler.summary(), Some(summary));
        assert_eq!(client.attempts(RemoteOp::AppendLog), 1);
        assert!(
            client
                .log_text(&Destination::Task)
                .ends_with(":: [   INFO   ] :: line 4\n")
        );

        let err = handler.emit(&record(5, Level::Info, "late")).unwrap_err();
        assert!(matches!(err, ReportError::Shutdown(_)));
    }

    #[test]
    fn test_result_level_and_process_logs() {
        let dir = TempDir::new().unwrap();
        let client = MemoryClient::new();
        let config = RemoteConfig {
            result_level: Level::Pass,
            process_logs: false,
            ..config(&dir)
        };
        let handler = RemoteHandler::new(config, Arc::new(client.clone())).unwrap();

        handler.emit(&record(0, Level::Info, "hidden")).unwrap();
        handler.emit(&record(1, Level::Pass, "shown")).unwrap();
        let file = Record::file(2, LogSource::bytes("x"), Some("x.log".to_string()), None, Flags::new())
            .unwrap();
        handler.emit(&file).unwrap();

        let summary = handler.end().unwrap();
        assert_eq!(summary.delivered, 1);
        assert_eq!(client.attempts(RemoteOp::UploadFile), 0);
        assert_eq!(
            client.log_text(&Destination::Task),
            ":: [   PASS   ] :: shown\n"
        );
    }

    #[test]
    fn test_explicit_flush_sends_buffered_text() {
        let dir = TempDir::new().unwrap();
        let client = MemoryClient::new();
        let handler = RemoteHandler::new(config(&dir), Arc::new(client.clone())).unwrap();

        handler.emit(&record(0, Level::Info, "a")).unwrap();
        handler.flush().unwrap();
        handler.emit(&record(1, Level::Info, "b")).unwrap();
        handler.end().unwrap();

        assert_eq!(client.attempts(RemoteOp::AppendLog), 2);
        assert_eq!(
            client.log_text(&Destination::Task),
            ":: [   INFO   ] :: a\n:: [   INFO   ] :: b\n"
        );
    }

    #[test]
    fn test_directory_client_end_to_end() {
        let dir = TempDir::new().unwrap();
        let results = TempDir::new().unwrap();
        let client = crate::remote::DirectoryClient::new(results.path());
        let handler = RemoteHandler::new(config(&dir), Arc::new(client)).unwrap();

        let pass = Record::log(
            0,
            Level::Pass,
            "ping ok",
            Flags::new().subtask_result_at("/ping").score(0).default_log_dest(),
        )
        .unwrap();
        handler.emit(&pass).unwrap();
        let file = Record::file(
            1,
            LogSource::bytes("pong\n"),
            Some("ping.log".to_string()),
            None,
            Flags::new(),
        )
        .unwrap();
        handler.emit(&file).unwrap();

        assert!(handler.end().unwrap().is_clean());

        let subtask = results.path().join("subtasks/1");
        assert_eq!(std::fs::read_to_string(subtask.join("path")).unwrap(), "/ping");
        assert_eq!(
            std::fs::read_to_string(subtask.join("results.log")).unwrap(),
            "Pass score=0 ping ok\n"
        );
        assert_eq!(
            std::fs::read_to_string(subtask.join("logs/ping.log")).unwrap(),
            "pong\n"
        );
        assert_eq!(
            std::fs::read_to_string(subtask.join("testout.log")).unwrap(),
            ":: [   PASS   ] :: ping ok\n"
        );
    }

    #[test]
    fn test_detached_handler_leaves_worker_running() {
        let dir = TempDir::new().unwrap();
        let client = MemoryClient::new();
        let handler = RemoteHandler::new(config(&dir), Arc::new(client.clone())).unwrap();

        handler.detach();
        assert!(!handler.is_owner());
        assert_eq!(handler.end().unwrap(), DeliverySummary::default());
        assert_eq!(handler.worker_state(), WorkerState::Running);
        handler.emit(&record(0, Level::Info, "still open")).unwrap();
    }
}
