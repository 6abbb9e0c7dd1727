//! Log buffering and the flush timer.
//!
//! Formatted result lines are not sent one by one; they accumulate per
//! destination in [`LogBuffers`] and are synced by the worker when the
//! [`FlushTimer`] fires, when a flush is requested, and once more at drain.
//! Flushing never touches routing state.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::NamedTempFile;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::remote::Destination;

/// Unsent log text per destination.
///
/// Lines for the task are also mirrored into a local temporary file so a
/// copy exists on the machine while the test runs. The mirror is best-effort
/// and goes away with the buffers.
pub struct LogBuffers {
    pending: BTreeMap<Destination, String>,
    mirror: Option<NamedTempFile>,
}

impl LogBuffers {
    /// Buffers without a local mirror.
    pub fn new() -> Self {
        Self {
            pending: BTreeMap::new(),
            mirror: None,
        }
    }

    /// Buffers mirroring task lines into `<dir>/<log_name>.XXXXXX`.
    pub fn with_mirror(dir: &Path, log_name: &str) -> Self {
        let mirror = tempfile::Builder::new()
            .prefix(&format!("{}.", log_name))
            .tempfile_in(dir);
        match mirror {
            Ok(file) => {
                debug!("Mirroring task log to {}", file.path().display());
                Self {
                    pending: BTreeMap::new(),
                    mirror: Some(file),
                }
            }
            Err(e) => {
                warn!("Cannot create local task log in {}: {}", dir.display(), e);
                Self::new()
            }
        }
    }

    pub fn mirror_path(&self) -> Option<PathBuf> {
        self.mirror.as_ref().map(|f| f.path().to_path_buf())
    }

    /// Appends text to a destination's buffer.
    pub fn append(&mut self, destination: &Destination, text: &str) {
        self.pending
            .entry(destination.clone())
            .or_default()
            .push_str(text);

        if *destination == Destination::Task
            && let Some(mirror) = self.mirror.as_mut()
            && let Err(e) = mirror.write_all(text.as_bytes())
        {
            warn!("Dropping local task log mirror: {}", e);
            self.mirror = None;
        }
    }

    /// Returns `true` if some text has not been sent yet.
    pub fn is_dirty(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Unsent text per destination, in a stable order.
    pub fn snapshot(&self) -> Vec<(Destination, String)> {
        self.pending
            .iter()
            .map(|(destination, text)| (destination.clone(), text.clone()))
            .collect()
    }

    pub fn pending(&self, destination: &Destination) -> Option<&str> {
        self.pending.get(destination).map(String::as_str)
    }

    /// Forgets the text of a destination after it was sent (or given up on).
    pub fn clear(&mut self, destination: &Destination) {
        self.pending.remove(destination);
    }
}

impl Default for LogBuffers {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodic flush trigger. A zero delay disables periodic flushing.
pub struct FlushTimer {
    interval: Option<Interval>,
}

impl FlushTimer {
    pub fn new(delay: Duration) -> Self {
        let interval = (!delay.is_zero()).then(|| {
            let mut interval = tokio::time::interval_at(Instant::now() + delay, delay);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        Self { interval }
    }

    /// Waits for the next tick. Never completes when disabled.
    pub async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}
