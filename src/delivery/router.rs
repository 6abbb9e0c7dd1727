//! Destination routing.
//!
//! [`route`] decides where a record goes from the worker's [`RoutingState`]
//! and the record's flags. It is a pure function: it returns the destination
//! and the state transition, and the worker applies the transition.
//!
//! Rules, first match wins for the destination:
//!
//! 1. `SUBTASK_RESULT` records have their subtask created (and registered as
//!    the latest subtask) by the worker before routing, so the rules below
//!    resolve to it.
//! 2. `TASK_LOG_FILE` on a file record goes to the task, even when other
//!    flags name a subtask that does not exist.
//! 3. `SUBTASK_LOG_FILE` goes to the named subtask, or the latest one.
//! 4. `DEFAULT_LOG_DEST` goes to the subtask this record targets, which also
//!    becomes the default for every later record.
//! 5. Anything else goes to the current default.

use std::collections::BTreeSet;

use crate::error::{ReportError, ReportResult};
use crate::record::{Record, SubtaskSelector};
use crate::remote::{Destination, DestinationId};

/// Routing state owned by the delivery worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingState {
    default_destination: Destination,
    open_subtasks: BTreeSet<DestinationId>,
    last_subtask: Option<DestinationId>,
}

impl Default for RoutingState {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingState {
    /// Fresh state: everything goes to the task.
    pub fn new() -> Self {
        Self {
            default_destination: Destination::Task,
            open_subtasks: BTreeSet::new(),
            last_subtask: None,
        }
    }

    pub fn default_destination(&self) -> &Destination {
        &self.default_destination
    }

    pub fn last_subtask(&self) -> Option<&DestinationId> {
        self.last_subtask.as_ref()
    }

    pub fn is_open(&self, id: &DestinationId) -> bool {
        self.open_subtasks.contains(id)
    }

    pub fn open_subtasks(&self) -> impl Iterator<Item = &DestinationId> {
        self.open_subtasks.iter()
    }

    /// Registers a subtask created on the remote side.
    pub fn open_subtask(&mut self, id: DestinationId) {
        self.open_subtasks.insert(id.clone());
        self.last_subtask = Some(id);
    }

    /// Makes the task the default destination again.
    pub fn reset_default(&mut self) {
        self.default_destination = Destination::Task;
    }

    /// Applies the transition computed by [`route`].
    pub fn apply(&mut self, routed: &Routed) {
        if let Some(default) = &routed.default_destination {
            self.default_destination = default.clone();
        }
    }

    fn resolve(&self, selector: &SubtaskSelector) -> ReportResult<DestinationId> {
        match selector {
            SubtaskSelector::Id(id) if self.is_open(id) => Ok(id.clone()),
            SubtaskSelector::Id(id) => Err(ReportError::unknown_subtask(id)),
            SubtaskSelector::Latest => self.latest(),
        }
    }

    fn latest(&self) -> ReportResult<DestinationId> {
        self.last_subtask.clone().ok_or_else(|| {
            ReportError::DestinationNotFound("no subtask result has been created yet".to_string())
        })
    }
}

/// Routing decision for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routed {
    /// Where the record goes.
    pub destination: Destination,
    /// New default destination, if the record changes it.
    pub default_destination: Option<Destination>,
}

impl Routed {
    /// Routes to `destination` without touching the state.
    pub fn to(destination: Destination) -> Self {
        Self {
            destination,
            default_destination: None,
        }
    }
}

/// Computes the destination of `record`.
///
/// # Errors
///
/// Returns [`ReportError::DestinationNotFound`] if the record targets a
/// subtask that was never created.
pub fn route(state: &RoutingState, record: &Record) -> ReportResult<Routed> {
    let flags = record.flags();

    if record.is_file() && flags.is_task_log_file() {
        let default_destination = if flags.is_default_log_dest() {
            targeted_subtask(state, flags.subtask_selector())
                .ok()
                .map(Destination::Subtask)
        } else {
            None
        };
        return Ok(Routed {
            destination: Destination::Task,
            default_destination,
        });
    }

    let explicit = flags
        .subtask_selector()
        .map(|selector| state.resolve(selector))
        .transpose()?;

    let new_default = if flags.is_default_log_dest() {
        let target = match &explicit {
            Some(id) => id.clone(),
            None => state.latest()?,
        };
        Some(Destination::Subtask(target))
    } else {
        None
    };

    let destination = if let Some(id) = explicit {
        Destination::Subtask(id)
    } else if let Some(default) = &new_default {
        default.clone()
    } else {
        state.default_destination.clone()
    };

    Ok(Routed {
        destination,
        default_destination: new_default,
    })
}

fn targeted_subtask(
    state: &RoutingState,
    selector: Option<&SubtaskSelector>,
) -> ReportResult<DestinationId> {
    match selector {
        Some(selector) => state.resolve(selector),
        None => state.latest(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Flags, Level, LogSource};

    fn log(flags: Flags) -> Record {
        Record::log(0, Level::Info, "msg", flags).unwrap()
    }

    fn file(flags: Flags) -> Record {
        Record::file(0, LogSource::bytes("data"), Some("f.log".to_string()), None, flags).unwrap()
    }

    fn subtask(id: &str) -> Destination {
        Destination::Subtask(DestinationId::new(id))
    }

    #[test]
    fn test_plain_record_goes_to_default() {
        let state = RoutingState::new();
        let routed = route(&state, &log(Flags::new())).unwrap();
        assert_eq!(routed, Routed::to(Destination::Task));
    }

    #[test]
    fn test_default_log_dest_moves_default() {
        let mut state = RoutingState::new();
        state.open_subtask(DestinationId::new("r1"));

        let routed = route(&state, &log(Flags::new().default_log_dest())).unwrap();
        assert_eq!(routed.destination, subtask("r1"));
        assert_eq!(routed.default_destination, Some(subtask("r1")));

        state.apply(&routed);
        let next = route(&state, &log(Flags::new())).unwrap();
        assert_eq!(next.destination, subtask("r1"));
    }

    #[test]
    fn test_task_log_file_overrides_default() {
        let mut state = RoutingState::new();
        state.open_subtask(DestinationId::new("r1"));
        state.apply(&route(&state, &log(Flags::new().default_log_dest())).unwrap());

        let routed = route(&state, &file(Flags::new().task_log_file())).unwrap();
        assert_eq!(routed.destination, Destination::Task);
        assert_eq!(routed.default_destination, None);
    }

    #[test]
    fn test_task_log_file_wins_over_missing_subtask() {
        let state = RoutingState::new();

        let unknown = file(
            Flags::new()
                .task_log_file()
                .subtask_log_file_of(DestinationId::new("nope")),
        );
        assert_eq!(route(&state, &unknown).unwrap(), Routed::to(Destination::Task));

        let latest = file(Flags::new().task_log_file().subtask_log_file());
        assert_eq!(route(&state, &latest).unwrap(), Routed::to(Destination::Task));
    }

    #[test]
    fn test_task_log_file_with_default_log_dest() {
        let mut state = RoutingState::new();
        let record = file(Flags::new().task_log_file().default_log_dest());
        assert_eq!(route(&state, &record).unwrap(), Routed::to(Destination::Task));

        state.open_subtask(DestinationId::new("r1"));
        let routed = route(&state, &record).unwrap();
        assert_eq!(routed.destination, Destination::Task);
        assert_eq!(routed.default_destination, Some(subtask("r1")));
    }

    #[test]
    fn test_task_log_file_ignored_on_log_records() {
        let mut state = RoutingState::new();
        state.open_subtask(DestinationId::new("r1"));
        state.apply(&route(&state, &log(Flags::new().default_log_dest())).unwrap());

        let routed = route(&state, &log(Flags::new().task_log_file())).unwrap();
        assert_eq!(routed.destination, subtask("r1"));
    }

    #[test]
    fn test_subtask_log_file_explicit_and_latest() {
        let mut state = RoutingState::new();
        state.open_subtask(DestinationId::new("r1"));
        state.open_subtask(DestinationId::new("r2"));

        let explicit = file(Flags::new().subtask_log_file_of(DestinationId::new("r1")));
        assert_eq!(route(&state, &explicit).unwrap().destination, subtask("r1"));

        let latest = file(Flags::new().subtask_log_file());
        assert_eq!(route(&state, &latest).unwrap().destination, subtask("r2"));
    }

    #[test]
    fn test_unknown_subtask_is_not_found() {
        let state = RoutingState::new();
        let record = file(Flags::new().subtask_log_file_of(DestinationId::new("nope")));
        assert!(matches!(
            route(&state, &record),
            Err(ReportError::DestinationNotFound(_))
        ));

        let record = log(Flags::new().default_log_dest());
        assert!(matches!(
            route(&state, &record),
            Err(ReportError::DestinationNotFound(_))
        ));
    }

    #[test]
    fn test_default_log_dest_with_explicit_subtask() {
        let mut state = RoutingState::new();
        state.open_subtask(DestinationId::new("r1"));
        state.open_subtask(DestinationId::new("r2"));

        let record = log(
            Flags::new()
                .subtask_log_file_of(DestinationId::new("r1"))
                .default_log_dest(),
        );
        let routed = route(&state, &record).unwrap();
        assert_eq!(routed.destination, subtask("r1"));
        assert_eq!(routed.default_destination, Some(subtask("r1")));
    }

    #[test]
    fn test_route_is_deterministic() {
        let mut state = RoutingState::new();
        state.open_subtask(DestinationId::new("r1"));
        let record = log(Flags::new().default_log_dest());

        let before = state.clone();
        assert_eq!(route(&state, &record).unwrap(), route(&state, &record).unwrap());
        assert_eq!(state, before);
    }

    #[test]
    fn test_reset_default() {
        let mut state = RoutingState::new();
        state.open_subtask(DestinationId::new("r1"));
        state.apply(&route(&state, &log(Flags::new().default_log_dest())).unwrap());
        state.reset_default();
        assert_eq!(state.default_destination(), &Destination::Task);
    }
}
