//! Outcome tracking shared by every interpreter of a restore session.

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};

/// What happened to one archive entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreAction {
    Written,
    Skipped,
    IncrementApplied,
    DirectoryCreated,
    LinkCreated,
    /// Entry kind the restore does not materialize.
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreOutcome {
    pub name: String,
    pub action: RestoreAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RestoreOutcome {
    pub fn ok(name: impl Into<String>, action: RestoreAction) -> Self {
        Self {
            name: name.into(),
            action,
            error: None,
        }
    }

    pub fn failed(name: impl Into<String>, action: RestoreAction, error: impl ToString) -> Self {
        Self {
            name: name.into(),
            action,
            error: Some(error.to_string()),
        }
    }
}

/// A failed entry in a [`RestoreSummary`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreFailure {
    pub name: String,
    pub error: String,
}

/// Aggregate counts read out of a [`RestoreTracker`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreSummary {
    pub written: usize,
    pub skipped: usize,
    pub increments_applied: usize,
    pub directories_created: usize,
    pub links_created: usize,
    pub ignored: usize,
    pub failures: Vec<RestoreFailure>,
}

impl RestoreSummary {
    pub fn total(&self) -> usize {
        self.written
            + self.skipped
            + self.increments_applied
            + self.directories_created
            + self.links_created
            + self.ignored
            + self.failures.len()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Thread-safe, append-only record of restore outcomes.
///
/// Clones share the same underlying list.
#[derive(Debug, Clone, Default)]
pub struct RestoreTracker {
    outcomes: Arc<Mutex<Vec<RestoreOutcome>>>,
}

impl RestoreTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, outcome: RestoreOutcome) {
        self.lock().push(outcome);
    }

    /// Copy of every recorded outcome, in no particular order.
    pub fn outcomes(&self) -> Vec<RestoreOutcome> {
        self.lock().clone()
    }

    pub fn snapshot(&self) -> RestoreSummary {
        let outcomes = self.lock();
        let mut summary = RestoreSummary::default();

        for outcome in outcomes.iter() {
            if let Some(error) = &outcome.error {
                summary.failures.push(RestoreFailure {
                    name: outcome.name.clone(),
                    error: error.clone(),
                });
                continue;
            }
            match outcome.action {
                RestoreAction::Written => summary.written += 1,
                RestoreAction::Skipped => summary.skipped += 1,
                RestoreAction::IncrementApplied => summary.increments_applied += 1,
                RestoreAction::DirectoryCreated => summary.directories_created += 1,
                RestoreAction::LinkCreated => summary.links_created += 1,
                RestoreAction::Ignored => summary.ignored += 1,
            }
        }

        summary
    }

    // A panic while holding the lock cannot leave the Vec half-pushed, so a
    // poisoned lock still holds a consistent list.
    fn lock(&self) -> MutexGuard<'_, Vec<RestoreOutcome>> {
        self.outcomes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
