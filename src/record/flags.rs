//! Routing flags attached to records.
//!
//! Flags are a closed set of variants ([`Flag`]) collected into a validated
//! [`Flags`] value. Loosely-typed input (for example flags coming from a
//! config file or a foreign caller) goes through [`Flags::parse`], which
//! checks the shape of every value up front so the delivery worker never has
//! to.
//!
//! | Flag | Shape | Effect |
//! |------|-------|--------|
//! | `TASK_LOG_FILE` | bool | send a file to the task, whatever the default is |
//! | `SUBTASK_RESULT` | bool or result path | create a new subtask result |
//! | `SCORE` | integer | score of the subtask result (required with `SUBTASK_RESULT`) |
//! | `SUBTASK_LOG_FILE` | bool or subtask id | attach to a created subtask |
//! | `DEFAULT_LOG_DEST` | bool | make the targeted subtask the new default |
//! | `REUPLOAD` | bool | upload the whole file instead of only new bytes |

use std::fmt;
use std::str::FromStr;

use crate::error::{ReportError, ReportResult};
use crate::remote::DestinationId;

/// A single routing flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flag {
    /// Send this file record to the task-level destination.
    TaskLogFile,
    /// Create a new subtask result, optionally under the given result path.
    SubtaskResult(Option<String>),
    /// Score attached to the subtask result being created.
    Score(i64),
    /// Attach to the given subtask, or to the most recently created one.
    SubtaskLogFile(Option<DestinationId>),
    /// Make the subtask targeted by this record the default destination.
    DefaultLogDest,
    /// Upload the whole file even if part of it was already sent.
    Reupload,
}

impl Flag {
    /// The name of this flag.
    pub fn name(&self) -> FlagName {
        match self {
            Flag::TaskLogFile => FlagName::TaskLogFile,
            Flag::SubtaskResult(_) => FlagName::SubtaskResult,
            Flag::Score(_) => FlagName::Score,
            Flag::SubtaskLogFile(_) => FlagName::SubtaskLogFile,
            Flag::DefaultLogDest => FlagName::DefaultLogDest,
            Flag::Reupload => FlagName::Reupload,
        }
    }
}

/// Name of a flag, used when flags are given as key/value pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlagName {
    TaskLogFile,
    SubtaskResult,
    Score,
    SubtaskLogFile,
    DefaultLogDest,
    Reupload,
}

impl FlagName {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagName::TaskLogFile => "TASK_LOG_FILE",
            FlagName::SubtaskResult => "SUBTASK_RESULT",
            FlagName::Score => "SCORE",
            FlagName::SubtaskLogFile => "SUBTASK_LOG_FILE",
            FlagName::DefaultLogDest => "DEFAULT_LOG_DEST",
            FlagName::Reupload => "REUPLOAD",
        }
    }
}

impl fmt::Display for FlagName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlagName {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TASK_LOG_FILE" => Ok(FlagName::TaskLogFile),
            "SUBTASK_RESULT" => Ok(FlagName::SubtaskResult),
            "SCORE" => Ok(FlagName::Score),
            "SUBTASK_LOG_FILE" => Ok(FlagName::SubtaskLogFile),
            "DEFAULT_LOG_DEST" => Ok(FlagName::DefaultLogDest),
            "REUPLOAD" => Ok(FlagName::Reupload),
            other => Err(ReportError::Configuration(format!(
                "unknown flag: {}",
                other
            ))),
        }
    }
}

/// Loosely-typed flag value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlagValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl From<bool> for FlagValue {
    fn from(v: bool) -> Self {
        FlagValue::Bool(v)
    }
}

impl From<i64> for FlagValue {
    fn from(v: i64) -> Self {
        FlagValue::Int(v)
    }
}

impl From<&str> for FlagValue {
    fn from(v: &str) -> Self {
        FlagValue::Str(v.to_string())
    }
}

impl From<String> for FlagValue {
    fn from(v: String) -> Self {
        FlagValue::Str(v)
    }
}

/// Request to create a subtask result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubtaskRequest {
    /// Result path (the subtask's name on the remote side).
    pub path: Option<String>,
}

/// Which subtask a `SUBTASK_LOG_FILE` flag points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubtaskSelector {
    /// The most recently created subtask.
    Latest,
    /// A specific subtask.
    Id(DestinationId),
}

/// Validated set of flags carried by a record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Flags {
    task_log_file: bool,
    subtask_result: Option<SubtaskRequest>,
    score: Option<i64>,
    subtask_log_file: Option<SubtaskSelector>,
    default_log_dest: bool,
    reupload: bool,
}

impl Flags {
    /// No flags: the record goes to the current default destination.
    pub fn new() -> Self {
        Self::default()
    }

    /// Collects flags, rejecting any flag given twice.
    pub fn from_flags<I>(flags: I) -> ReportResult<Self>
    where
        I: IntoIterator<Item = Flag>,
    {
        let mut out = Flags::new();
        let mut seen = Vec::new();
        for flag in flags {
            let name = flag.name();
            if seen.contains(&name) {
                return Err(ReportError::Configuration(format!(
                    "flag {} given more than once",
                    name
                )));
            }
            seen.push(name);
            out.set(flag);
        }
        Ok(out)
    }

    /// Parses key/value flags, checking the shape of each value.
    ///
    /// A boolean flag set to `false` is treated as absent. `SCORE` is only
    /// checked when `SUBTASK_RESULT` is set, since it is ignored otherwise.
    pub fn parse<I, V>(pairs: I) -> ReportResult<Self>
    where
        I: IntoIterator<Item = (FlagName, V)>,
        V: Into<FlagValue>,
    {
        let mut flags = Vec::new();
        let mut bad_score = None;
        for (name, value) in pairs {
            match (name, value.into()) {
                (FlagName::Score, FlagValue::Int(score)) => flags.push(Flag::Score(score)),
                (FlagName::Score, value) => bad_score = Some(value),
                (name, value) => flags.extend(typed_flag(name, value)?),
            }
        }

        let flags = Self::from_flags(flags)?;
        match bad_score {
            Some(value) if flags.subtask_result.is_some() => Err(ReportError::Configuration(
                format!("invalid value for {}: {:?}", FlagName::Score, value),
            )),
            _ => Ok(flags),
        }
    }

    fn set(&mut self, flag: Flag) {
        match flag {
            Flag::TaskLogFile => self.task_log_file = true,
            Flag::SubtaskResult(path) => self.subtask_result = Some(SubtaskRequest { path }),
            Flag::Score(score) => self.score = Some(score),
            Flag::SubtaskLogFile(None) => self.subtask_log_file = Some(SubtaskSelector::Latest),
            Flag::SubtaskLogFile(Some(id)) => {
                self.subtask_log_file = Some(SubtaskSelector::Id(id))
            }
            Flag::DefaultLogDest => self.default_log_dest = true,
            Flag::Reupload => self.reupload = true,
        }
    }

    pub fn task_log_file(mut self) -> Self {
        self.task_log_file = true;
        self
    }

    pub fn subtask_result(mut self) -> Self {
        self.subtask_result = Some(SubtaskRequest::default());
        self
    }

    pub fn subtask_result_at(mut self, path: impl Into<String>) -> Self {
        self.subtask_result = Some(SubtaskRequest {
            path: Some(path.into()),
        });
        self
    }

    pub fn score(mut self, score: i64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn subtask_log_file(mut self) -> Self {
        self.subtask_log_file = Some(SubtaskSelector::Latest);
        self
    }

    pub fn subtask_log_file_of(mut self, id: DestinationId) -> Self {
        self.subtask_log_file = Some(SubtaskSelector::Id(id));
        self
    }

    pub fn default_log_dest(mut self) -> Self {
        self.default_log_dest = true;
        self
    }

    pub fn reupload(mut self) -> Self {
        self.reupload = true;
        self
    }

    pub fn is_task_log_file(&self) -> bool {
        self.task_log_file
    }

    pub fn subtask_request(&self) -> Option<&SubtaskRequest> {
        self.subtask_result.as_ref()
    }

    pub fn score_value(&self) -> Option<i64> {
        self.score
    }

    pub fn subtask_selector(&self) -> Option<&SubtaskSelector> {
        self.subtask_log_file.as_ref()
    }

    pub fn is_default_log_dest(&self) -> bool {
        self.default_log_dest
    }

    pub fn is_reupload(&self) -> bool {
        self.reupload
    }

    /// True when no flag influences routing.
    pub fn is_plain(&self) -> bool {
        !self.task_log_file
            && self.subtask_result.is_none()
            && self.subtask_log_file.is_none()
            && !self.default_log_dest
    }

    /// Checks the flags against the kind of record carrying them.
    pub(crate) fn validate(&self, is_file: bool) -> ReportResult<()> {
        if self.subtask_result.is_some() {
            if is_file {
                return Err(ReportError::Configuration(
                    "SUBTASK_RESULT cannot be set on a file record".to_string(),
                ));
            }
            if self.score.is_none() {
                return Err(ReportError::Configuration(
                    "SCORE is required when SUBTASK_RESULT is set".to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn typed_flag(name: FlagName, value: FlagValue) -> ReportResult<Option<Flag>> {
    let flag = match (name, value) {
        (_, FlagValue::Bool(false)) => None,
        (FlagName::TaskLogFile, FlagValue::Bool(true)) => Some(Flag::TaskLogFile),
        (FlagName::DefaultLogDest, FlagValue::Bool(true)) => Some(Flag::DefaultLogDest),
        (FlagName::Reupload, FlagValue::Bool(true)) => Some(Flag::Reupload),
        (FlagName::SubtaskResult, FlagValue::Bool(true)) => Some(Flag::SubtaskResult(None)),
        (FlagName::SubtaskResult, FlagValue::Str(path)) => Some(Flag::SubtaskResult(Some(path))),
        (FlagName::SubtaskLogFile, FlagValue::Bool(true)) => Some(Flag::SubtaskLogFile(None)),
        (FlagName::SubtaskLogFile, FlagValue::Str(id)) => {
            Some(Flag::SubtaskLogFile(Some(DestinationId::new(id))))
        }
        (name, value) => {
            return Err(ReportError::Configuration(format!(
                "invalid value for {}: {:?}",
                name, value
            )));
        }
    };
    Ok(flag)
}
