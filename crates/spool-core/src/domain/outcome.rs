//! Handler verdicts and what the dispatcher did with each file.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What a handler says about a task it was offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    /// Not this handler's task; the next handler gets a turn.
    NotMine,
    /// Finished. The spool file is deleted.
    Done,
    /// Leave the file untouched and offer it again on a later pass.
    Retry,
}

/// Result of processing a single candidate file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Could not open or lock the file; left for a later pass.
    Skipped,
    /// Undecodable; the file was destroyed.
    Corrupted,
    /// A handler returned [`Verdict::Done`]; the file was deleted.
    Completed { elapsed: Duration },
    /// A handler returned [`Verdict::Retry`].
    Retried,
    /// Every handler returned [`Verdict::NotMine`].
    Abandoned,
}

/// Counters for one scan + dispatch pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassReport {
    pub deferred: usize,
    pub skipped: usize,
    pub corrupted: usize,
    pub completed: usize,
    pub retried: usize,
    pub abandoned: usize,
}

impl PassReport {
    pub fn record(&mut self, outcome: &DispatchOutcome) {
        match outcome {
            DispatchOutcome::Skipped => self.skipped += 1,
            DispatchOutcome::Corrupted => self.corrupted += 1,
            DispatchOutcome::Completed { .. } => self.completed += 1,
            DispatchOutcome::Retried => self.retried += 1,
            DispatchOutcome::Abandoned => self.abandoned += 1,
        }
    }

    /// Files that reached the handler chain.
    pub fn dispatched(&self) -> usize {
        self.completed + self.retried + self.abandoned
    }
}
