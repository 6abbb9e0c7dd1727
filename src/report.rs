//! The reporting facade and its handlers.
//!
//! A [`Reporter`] is built with an explicit, ordered list of [`Handler`]s and
//! passes every record to each of them. Handlers decide by level whether a
//! record concerns them; the remote handler then only enqueues it, so
//! reporting never waits on the network.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use teres::config::RemoteConfig;
//! use teres::remote::MemoryClient;
//! use teres::report::{RemoteHandler, Reporter};
//! use teres::{Flags, Level};
//!
//! let client = MemoryClient::new();
//! let config = RemoteConfig { flush_delay_ms: 0, ..RemoteConfig::default() };
//! let reporter = Reporter::builder()
//!     .with_handler(RemoteHandler::new(config, Arc::new(client.clone()))?)
//!     .build();
//!
//! reporter.log_pass("setup done")?;
//! reporter.log(Level::Fail, "bad checksum", Flags::new().subtask_result().score(1))?;
//!
//! let summary = reporter.end()?;
//! assert!(summary.is_clean());
//! assert_eq!(reporter.overall_result(), Level::Fail);
//! # Ok::<(), teres::ReportError>(())
//! ```

pub mod logging;
pub mod remote;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::delivery::DeliverySummary;
use crate::error::{ReportError, ReportResult};
use crate::record::{Flags, Level, LogSource, Record};

pub use logging::LoggingHandler;
pub use remote::RemoteHandler;

/// A sink for records.
///
/// Implementors provide [`emit_log`](Handler::emit_log) and
/// [`emit_file`](Handler::emit_file); [`emit`](Handler::emit) applies the
/// level threshold and the `process_logs` switch before calling them.
pub trait Handler: Send + Sync {
    /// Records below this level are ignored.
    fn result_level(&self) -> Level {
        Level::Info
    }

    /// Whether file records are handled at all.
    fn process_logs(&self) -> bool {
        true
    }

    fn emit_log(&self, record: &Record) -> ReportResult<()>;

    fn emit_file(&self, record: &Record) -> ReportResult<()>;

    /// Sends whatever is buffered. Handlers without buffers do nothing.
    fn flush(&self) -> ReportResult<()> {
        Ok(())
    }

    /// Makes the task the default destination again.
    fn reset_log_dest(&self) -> ReportResult<()> {
        Ok(())
    }

    /// Finishes the handler. Called once when the reporter ends.
    fn close(&self) -> ReportResult<DeliverySummary> {
        Ok(DeliverySummary::default())
    }

    fn emit(&self, record: &Record) -> ReportResult<()> {
        if record.level() < self.result_level() {
            return Ok(());
        }

        if record.is_file() {
            if !self.process_logs() {
                return Ok(());
            }
            return self.emit_file(record);
        }

        if record.message().is_none() {
            return Ok(());
        }
        self.emit_log(record)
    }
}

impl<H: Handler + ?Sized> Handler for Arc<H> {
    fn result_level(&self) -> Level {
        (**self).result_level()
    }

    fn process_logs(&self) -> bool {
        (**self).process_logs()
    }

    fn emit_log(&self, record: &Record) -> ReportResult<()> {
        (**self).emit_log(record)
    }

    fn emit_file(&self, record: &Record) -> ReportResult<()> {
        (**self).emit_file(record)
    }

    fn flush(&self) -> ReportResult<()> {
        (**self).flush()
    }

    fn reset_log_dest(&self) -> ReportResult<()> {
        (**self).reset_log_dest()
    }

    fn close(&self) -> ReportResult<DeliverySummary> {
        (**self).close()
    }

    fn emit(&self, record: &Record) -> ReportResult<()> {
        (**self).emit(record)
    }
}

/// Builder for a [`Reporter`].
#[derive(Default)]
pub struct ReporterBuilder {
    handlers: Vec<Box<dyn Handler>>,
}

impl ReporterBuilder {
    /// Adds a handler. Handlers see records in the order they were added.
    pub fn with_handler<H: Handler + 'static>(mut self, handler: H) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn build(self) -> Reporter {
        Reporter {
            handlers: self.handlers,
            seq: Mutex::new(0),
            overall: Mutex::new(Level::None),
            finished: AtomicBool::new(false),
            summary: Mutex::new(None),
            owner: AtomicU32::new(std::process::id()),
        }
    }
}

/// Producer API of a reporting session.
///
/// All methods take `&self`; share the reporter between threads with an
/// `Arc`. Reporting calls return as soon as every handler accepted the
/// record.
pub struct Reporter {
    handlers: Vec<Box<dyn Handler>>,
    /// Next sequence number. Held while a record is dispatched, so handlers
    /// see records in sequence order.
    seq: Mutex<u64>,
    overall: Mutex<Level>,
    finished: AtomicBool,
    summary: Mutex<Option<DeliverySummary>>,
    owner: AtomicU32,
}

impl Reporter {
    pub fn builder() -> ReporterBuilder {
        ReporterBuilder::default()
    }

    /// Reports a result message.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Configuration`] for invalid flags and
    /// [`ReportError::Shutdown`] after [`end`](Reporter::end).
    pub fn log(&self, level: Level, message: impl Into<String>, flags: Flags) -> ReportResult<()> {
        self.ensure_open()?;
        self.submit(|seq| Record::log(seq, level, message, flags))
    }

    pub fn log_error(&self, message: impl Into<String>) -> ReportResult<()> {
        self.log(Level::Error, message, Flags::new())
    }

    pub fn log_fail(&self, message: impl Into<String>) -> ReportResult<()> {
        self.log(Level::Fail, message, Flags::new())
    }

    pub fn log_pass(&self, message: impl Into<String>) -> ReportResult<()> {
        self.log(Level::Pass, message, Flags::new())
    }

    pub fn log_info(&self, message: impl Into<String>) -> ReportResult<()> {
        self.log(Level::Info, message, Flags::new())
    }

    pub fn log_debug(&self, message: impl Into<String>) -> ReportResult<()> {
        self.log(Level::Debug, message, Flags::new())
    }

    /// Attaches a log file.
    ///
    /// Path sources are read when the record is delivered, so a file that
    /// keeps growing can be sent again later and only its new tail goes out.
    pub fn send_file(
        &self,
        source: LogSource,
        name: Option<&str>,
        message: Option<&str>,
        flags: Flags,
    ) -> ReportResult<()> {
        self.ensure_open()?;
        self.submit(|seq| {
            Record::file(
                seq,
                source,
                name.map(str::to_string),
                message.map(str::to_string),
                flags,
            )
        })
    }

    /// Asks every handler to send what it buffered.
    pub fn flush(&self) -> ReportResult<()> {
        self.ensure_open()?;
        self.handlers.iter().try_for_each(|handler| handler.flush())
    }

    /// Makes the task the default log destination again.
    pub fn reset_log_dest(&self) -> ReportResult<()> {
        self.ensure_open()?;
        self.handlers
            .iter()
            .try_for_each(|handler| handler.reset_log_dest())
    }

    /// Highest verdict reported so far (`NONE`, `PASS`, `FAIL` or `ERROR`).
    pub fn overall_result(&self) -> Level {
        *lock(&self.overall)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Returns `true` in the process that built the reporter, unless
    /// detached.
    pub fn is_owner(&self) -> bool {
        self.owner.load(Ordering::SeqCst) == std::process::id()
    }

    /// Gives up ownership: `end` and drop become no-ops for this value.
    pub fn detach(&self) {
        self.owner.store(0, Ordering::SeqCst);
    }

    /// Ends the session: closes every handler, waiting until all queued
    /// records were delivered, and returns the combined delivery summary.
    ///
    /// Later calls return the same summary without doing anything. Outside
    /// the owning process this does nothing and returns an empty summary.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Worker`] if a delivery worker died.
    pub fn end(&self) -> ReportResult<DeliverySummary> {
        if !self.is_owner() {
            debug!("Not the owning process, leaving the session open");
            return Ok(DeliverySummary::default());
        }

        let mut summary = lock(&self.summary);
        if let Some(summary) = summary.as_ref() {
            return Ok(summary.clone());
        }

        self.finished.store(true, Ordering::SeqCst);

        let mut combined = DeliverySummary::default();
        let mut first_error = None;
        for handler in &self.handlers {
            match handler.close() {
                Ok(handler_summary) => combined.merge(handler_summary),
                Err(e) => {
                    warn!("Handler failed to close: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        *summary = Some(combined.clone());
        match first_error {
            Some(e) => Err(e),
            None => Ok(combined),
        }
    }

    fn ensure_open(&self) -> ReportResult<()> {
        if self.is_finished() {
            return Err(ReportError::Shutdown(
                "the reporting session already ended".to_string(),
            ));
        }
        Ok(())
    }

    /// Builds a record with the next sequence number and dispatches it. A
    /// record that fails validation does not use up a number.
    fn submit<F>(&self, build: F) -> ReportResult<()>
    where
        F: FnOnce(u64) -> ReportResult<Record>,
    {
        let mut seq = lock(&self.seq);
        let record = build(*seq)?;
        *seq += 1;

        if record.level().is_verdict() {
            let mut overall = lock(&self.overall);
            *overall = (*overall).max(record.level());
        }

        self.dispatch(&record)
    }

    fn dispatch(&self, record: &Record) -> ReportResult<()> {
        let mut result = Ok(());
        for handler in &self.handlers {
            if let Err(e) = handler.emit(record)
                && result.is_ok()
            {
                result = Err(e);
            }
        }
        result
    }
}

impl Drop for Reporter {
    fn drop(&mut self) {
        if !self.is_owner() || self.is_finished() {
            return;
        }

        if let Err(e) = self.log_error("Test ended unexpectedly.") {
            warn!("Cannot report unexpected end: {}", e);
        }
        if let Err(e) = self.end() {
            warn!("Reporting session ended with errors: {}", e);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
