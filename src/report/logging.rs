//! Handler writing records to the local `tracing` log.

use std::path::{Path, PathBuf};

use tracing::{debug, error, info};

use super::Handler;
use crate::config::LoggingConfig;
use crate::error::{ReportError, ReportResult};
use crate::record::{Level, LogSource, Record, format_line};

/// Logs result messages as `tracing` events and keeps copies of attached
/// files in a directory of its own.
///
/// The directory is created under `dest` with the handler name as prefix
/// and is left in place when the handler goes away.
pub struct LoggingHandler {
    name: String,
    result_level: Level,
    logdir: PathBuf,
}

impl LoggingHandler {
    pub fn new(config: &LoggingConfig) -> ReportResult<Self> {
        let logdir = tempfile::Builder::new()
            .prefix(&config.name)
            .tempdir_in(&config.dest)
            .map_err(|e| {
                ReportError::Io(format!(
                    "cannot create log directory in {}: {}",
                    config.dest.display(),
                    e
                ))
            })?
            .keep();

        debug!("Logging handler {} keeps files in {}", config.name, logdir.display());

        Ok(Self {
            name: config.name.clone(),
            result_level: config.result_level,
            logdir,
        })
    }

    pub fn logdir(&self) -> &Path {
        &self.logdir
    }

    fn write(&self, level: Level, line: &str) {
        match level {
            Level::Error | Level::Fail => error!(handler = %self.name, "{}", line),
            Level::Pass | Level::Info | Level::File => info!(handler = %self.name, "{}", line),
            Level::Debug => debug!(handler = %self.name, "{}", line),
            Level::None => {}
        }
    }
}

impl Handler for LoggingHandler {
    fn result_level(&self) -> Level {
        self.result_level
    }

    fn emit_log(&self, record: &Record) -> ReportResult<()> {
        if let Some(line) = record.formatted() {
            self.write(record.level(), &line);
        }
        Ok(())
    }

    fn emit_file(&self, record: &Record) -> ReportResult<()> {
        let (Some(source), Some(name)) = (record.source(), record.name()) else {
            return Ok(());
        };

        let target = self.logdir.join(name);
        let content = source.read_all()?;
        std::fs::write(&target, content)?;

        let message = match record.message() {
            Some(message) => message.to_string(),
            None => {
                let origin = match source {
                    LogSource::Path(path) => path.display().to_string(),
                    _ => name.to_string(),
                };
                format!("Copying {} to: {}", origin, target.display())
            }
        };
        self.write(record.level(), &format_line(record.level(), &message));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Flags;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn handler(dest: &TempDir) -> LoggingHandler {
        LoggingHandler::new(&LoggingConfig {
            name: "suite".to_string(),
            dest: dest.path().to_path_buf(),
            result_level: Level::Debug,
        })
        .unwrap()
    }

    #[test]
    fn test_logdir_created_under_dest() {
        let dest = TempDir::new().unwrap();
        let handler = handler(&dest);

        assert!(handler.logdir().is_dir());
        assert!(handler.logdir().starts_with(dest.path()));
        assert!(
            handler
                .logdir()
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("suite")
        );
    }

    #[test]
    fn test_files_are_copied() {
        let dest = TempDir::new().unwrap();
        let handler = handler(&dest);

        let src = dest.path().join("build output.log");
        std::fs::write(&src, "compiled").unwrap();
        let record = Record::file(0, LogSource::path(&src), None, None, Flags::new()).unwrap();
        handler.emit(&record).unwrap();

        let stream = Arc::new(Mutex::new(Cursor::new(b"streamed".to_vec())));
        let record = Record::file(
            1,
            LogSource::stream(stream),
            Some("stream.log".to_string()),
            Some("captured stream".to_string()),
            Flags::new(),
        )
        .unwrap();
        handler.emit(&record).unwrap();

        assert_eq!(
            std::fs::read_to_string(handler.logdir().join("build_output.log")).unwrap(),
            "compiled"
        );
        assert_eq!(
            std::fs::read_to_string(handler.logdir().join("stream.log")).unwrap(),
            "streamed"
        );
    }

    #[test]
    fn test_missing_file_is_an_io_error() {
        let dest = TempDir::new().unwrap();
        let handler = handler(&dest);

        let record = Record::file(
            0,
            LogSource::path(dest.path().join("absent.log")),
            None,
            None,
            Flags::new(),
        )
        .unwrap();
        assert!(matches!(handler.emit(&record), Err(ReportError::Io(_))));
    }

    #[test]
    fn test_missing_dest_fails() {
        let result = LoggingHandler::new(&LoggingConfig {
            dest: PathBuf::from("/nonexistent/teres-logs"),
            ..LoggingConfig::default()
        });
        assert!(matches!(result, Err(ReportError::Io(_))));
    }
}
