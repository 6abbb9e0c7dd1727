//! Report records and result levels.
//!
//! A [`Record`] is one reporting event: a result message or an attached log
//! file. Records are validated when constructed and immutable afterwards;
//! the delivery worker only ever reads them.

pub mod flags;

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::{ReportError, ReportResult};

pub use flags::{Flag, FlagName, FlagValue, Flags, SubtaskRequest, SubtaskSelector};

/// Result level of a record.
///
/// Levels are ordered: `NONE < DEBUG < INFO < PASS < FAIL < ERROR < FILE`.
/// `DEBUG` through `ERROR` are result levels; `FILE` marks attachments and
/// `NONE` means "nothing reported yet".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    #[default]
    None = 0,
    Debug = 10,
    Info = 20,
    Pass = 30,
    Fail = 40,
    Error = 50,
    File = 99,
}

impl Level {
    pub fn name(&self) -> &'static str {
        match self {
            Level::None => "NONE",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Pass => "PASS",
            Level::Fail => "FAIL",
            Level::Error => "ERROR",
            Level::File => "FILE",
        }
    }

    /// The result name understood by the lab controller.
    pub fn remote_result(&self) -> &'static str {
        match self {
            Level::Error => "Warn",
            Level::Fail => "Fail",
            Level::Pass => "Pass",
            _ => "None",
        }
    }

    /// True for levels that contribute to the overall test result.
    pub fn is_verdict(&self) -> bool {
        matches!(self, Level::Pass | Level::Fail | Level::Error)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Anything a log stream can be read back from.
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

/// A stream shared between the test and the delivery worker.
pub type SharedStream = Arc<Mutex<dyn ReadSeek + Send>>;

/// Where the content of a log attachment comes from.
#[derive(Clone)]
pub enum LogSource {
    /// Content captured at reporting time.
    Bytes(Arc<[u8]>),
    /// A file read when the record is delivered.
    Path(PathBuf),
    /// A stream read from its start when the record is delivered. The
    /// stream position is restored afterwards so the test can keep writing.
    Stream(SharedStream),
}

impl LogSource {
    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        LogSource::Bytes(data.into().into())
    }

    pub fn path(path: impl Into<PathBuf>) -> Self {
        LogSource::Path(path.into())
    }

    pub fn stream<S>(stream: Arc<Mutex<S>>) -> Self
    where
        S: Read + Seek + Send + 'static,
    {
        LogSource::Stream(stream)
    }

    /// Attachment name derived from the source, if it has one.
    ///
    /// Only paths carry a name: the file name with spaces replaced by `_`.
    pub fn default_name(&self) -> Option<String> {
        match self {
            LogSource::Path(path) => path_to_name(path),
            _ => None,
        }
    }

    /// Reads the complete current content.
    pub fn read_all(&self) -> io::Result<Vec<u8>> {
        match self {
            LogSource::Bytes(data) => Ok(data.to_vec()),
            LogSource::Path(path) => std::fs::read(path),
            LogSource::Stream(stream) => {
                let mut stream = stream
                    .lock()
                    .map_err(|_| io::Error::other("log stream lock poisoned"))?;
                let position = stream.stream_position()?;
                stream.seek(SeekFrom::Start(0))?;
                let mut data = Vec::new();
                let read = stream.read_to_end(&mut data);
                stream.seek(SeekFrom::Start(position))?;
                read?;
                Ok(data)
            }
        }
    }
}

impl fmt::Debug for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogSource::Bytes(data) => write!(f, "Bytes({} bytes)", data.len()),
            LogSource::Path(path) => write!(f, "Path({})", path.display()),
            LogSource::Stream(_) => f.write_str("Stream"),
        }
    }
}

fn path_to_name(path: &Path) -> Option<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().replace(' ', "_"))
        .filter(|name| !name.is_empty())
}

/// Kind of a record, deciding how the worker dispatches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// A result message appended to a log and optionally posted as a result.
    Log,
    /// An attached log file uploaded to a destination.
    File,
}

/// One reporting event queued for delivery.
#[derive(Debug, Clone)]
pub struct Record {
    seq: u64,
    level: Level,
    message: Option<String>,
    source: Option<LogSource>,
    name: Option<String>,
    flags: Flags,
}

impl Record {
    /// Creates a result message record.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Configuration`] if `level` is not a result
    /// level or the flags are inconsistent.
    pub fn log(seq: u64, level: Level, message: impl Into<String>, flags: Flags) -> ReportResult<Self> {
        if matches!(level, Level::File | Level::None) {
            return Err(ReportError::Configuration(format!(
                "level {} cannot be used for a result message",
                level
            )));
        }
        flags.validate(false)?;

        Ok(Self {
            seq,
            level,
            message: Some(message.into()),
            source: None,
            name: None,
            flags,
        })
    }

    /// Creates a file attachment record.
    ///
    /// Without an explicit `name`, path sources are named after their file
    /// name; bytes and stream sources must be named.
    pub fn file(
        seq: u64,
        source: LogSource,
        name: Option<String>,
        message: Option<String>,
        flags: Flags,
    ) -> ReportResult<Self> {
        flags.validate(true)?;

        let name = match name.or_else(|| source.default_name()) {
            Some(name) => name,
            None => {
                return Err(ReportError::Configuration(format!(
                    "a name is required for {:?} attachments",
                    source
                )));
            }
        };

        Ok(Self {
            seq,
            level: Level::File,
            message,
            source: Some(source),
            name: Some(name),
            flags,
        })
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn source(&self) -> Option<&LogSource> {
        self.source.as_ref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn flags(&self) -> &Flags {
        &self.flags
    }

    pub fn kind(&self) -> RecordKind {
        if self.source.is_some() {
            RecordKind::File
        } else {
            RecordKind::Log
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind() == RecordKind::File
    }

    /// The message as a log line, e.g. `":: [   PASS   ] :: done"`.
    pub fn formatted(&self) -> Option<String> {
        self.message
            .as_deref()
            .map(|message| format_line(self.level, message))
    }
}

/// Formats a message the way it appears in test logs.
pub fn format_line(level: Level, message: &str) -> String {
    format!(":: [   {:<7}] :: {}", level.name(), message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    #[test]
    fn test_level_ordering() {
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Pass);
        assert!(Level::Pass < Level::Fail);
        assert!(Level::Fail < Level::Error);
        assert!(Level::Error < Level::File);
        assert!(Level::None < Level::Debug);
    }

    #[test]
    fn test_format_line() {
        assert_eq!(format_line(Level::Pass, "ok"), ":: [   PASS   ] :: ok");
        assert_eq!(format_line(Level::Error, "boom"), ":: [   ERROR  ] :: boom");
        assert_eq!(format_line(Level::Info, "note"), ":: [   INFO   ] :: note");
        assert_eq!(format_line(Level::Debug, "x"), ":: [   DEBUG  ] :: x");
    }

    #[test]
    fn test_remote_result_mapping() {
        assert_eq!(Level::Error.remote_result(), "Warn");
        assert_eq!(Level::Fail.remote_result(), "Fail");
        assert_eq!(Level::Pass.remote_result(), "Pass");
        assert_eq!(Level::Info.remote_result(), "None");
    }

    #[test]
    fn test_log_record_rejects_file_level() {
        let err = Record::log(0, Level::File, "nope", Flags::new()).unwrap_err();
        assert!(matches!(err, ReportError::Configuration(_)));
    }

    #[test]
    fn test_file_record_name_from_path() {
        let record = Record::file(
            1,
            LogSource::path("/tmp/my test log.txt"),
            None,
            None,
            Flags::new(),
        )
        .unwrap();
        assert_eq!(record.name(), Some("my_test_log.txt"));
        assert_eq!(record.kind(), RecordKind::File);
        assert_eq!(record.level(), Level::File);
    }

    #[test]
    fn test_stream_record_requires_name() {
        let stream = Arc::new(Mutex::new(Cursor::new(Vec::new())));
        let err = Record::file(1, LogSource::stream(stream), None, None, Flags::new()).unwrap_err();
        assert!(matches!(err, ReportError::Configuration(_)));
    }

    #[test]
    fn test_stream_position_is_restored() {
        let stream = Arc::new(Mutex::new(Cursor::new(Vec::new())));
        stream.lock().unwrap().write_all(b"hello world").unwrap();

        let source = LogSource::stream(stream.clone());
        assert_eq!(source.read_all().unwrap(), b"hello world");
        assert_eq!(stream.lock().unwrap().position(), 11);

        stream.lock().unwrap().write_all(b"!").unwrap();
        assert_eq!(source.read_all().unwrap(), b"hello world!");
    }
}
