//! Events broadcast by the batch orchestrator.
//!
//! Subscribe with
//! [`BatchOrchestrator::subscribe`](crate::orchestrator::BatchOrchestrator::subscribe).
//! Slow receivers may lag; the authoritative record is the batch state and
//! the returned [`BatchSummary`](crate::state::BatchSummary).

use serde::Serialize;
use scriptreel_core::types::Timestamp;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEvent {
    BatchStarted { run_id: Uuid, total: usize },

    ItemStarted {
        run_id: Uuid,
        index: usize,
        source_label: String,
        started_at: Timestamp,
    },

    /// Latest progress for the in-flight item, in `[0.0, 1.0]`.
    ItemProgress { run_id: Uuid, index: usize, progress: f64 },

    ItemMessage { run_id: Uuid, index: usize, message: String },

    ItemCompleted {
        run_id: Uuid,
        index: usize,
        source_label: String,
        task_id: String,
        artifact: String,
        finished_at: Timestamp,
    },

    ItemFailed {
        run_id: Uuid,
        index: usize,
        source_label: String,
        reason: String,
        finished_at: Timestamp,
    },

    /// The item was in flight when the run was cancelled. It is recorded
    /// as neither completed nor failed.
    ItemAbandoned {
        run_id: Uuid,
        index: usize,
        source_label: String,
        task_id: Option<String>,
    },

    /// Run processed every item.
    BatchFinished {
        run_id: Uuid,
        completed: usize,
        failed: usize,
    },

    /// Run stopped early on request.
    BatchCancelled {
        run_id: Uuid,
        completed: usize,
        failed: usize,
        skipped: usize,
    },
}
