//! Batch state owned by one orchestrator instance.
//!
//! The orchestrator mutates this only from its own loop and the progress
//! sink of the in-flight job. Everyone else reads clones via
//! [`BatchOrchestrator::snapshot`](crate::orchestrator::BatchOrchestrator::snapshot).

use serde::Serialize;
use uuid::Uuid;

/// A job that ended in failure, timed out, or could not be submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedItem {
    pub source_label: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchState {
    /// Identifier of the current (or last) run.
    pub run_id: Option<Uuid>,
    pub is_running: bool,
    /// Source labels of the run's items, in processing order.
    pub items: Vec<String>,
    /// Index of the item being monitored. Retains the last processed index
    /// after the run ends; only meaningful while `is_running`.
    pub current_index: Option<usize>,
    /// Append-only.
    pub completed: Vec<String>,
    /// Append-only.
    pub failed: Vec<FailedItem>,
    pub current_progress: f64,
    pub current_message: String,
    /// Set when the last run stopped because of `cancel()`.
    pub cancelled: bool,
}

impl BatchState {
    /// Fresh state for a new run.
    pub(crate) fn for_run(run_id: Uuid, items: Vec<String>) -> Self {
        Self {
            run_id: Some(run_id),
            is_running: true,
            items,
            ..Self::default()
        }
    }

    /// Number of items that reached a terminal outcome.
    pub fn processed(&self) -> usize {
        self.completed.len() + self.failed.len()
    }

    /// Items not yet processed (or skipped by cancellation).
    pub fn remaining(&self) -> usize {
        self.items.len().saturating_sub(self.processed())
    }
}

/// Final report of one run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub run_id: Uuid,
    pub total: usize,
    pub completed: Vec<String>,
    pub failed: Vec<FailedItem>,
    pub cancelled: bool,
}

impl BatchSummary {
    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    /// Items that never reached a terminal outcome.
    pub fn skipped_count(&self) -> usize {
        self.total
            .saturating_sub(self.completed.len() + self.failed.len())
    }
}
