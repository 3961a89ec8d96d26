//! Sequential batch orchestrator.
//!
//! [`BatchOrchestrator`] runs an ordered list of jobs through the
//! [`JobMonitor`] strictly one at a time. A failed job is recorded and the
//! batch moves on; only an empty list or an already-running batch stops a
//! run before it starts.
//!
//! Cancellation is cooperative. [`cancel`](BatchOrchestrator::cancel)
//! cancels the run's token, which immediately tears down the in-flight
//! job's progress stream; the loop notices at its next iteration boundary.
//! The remote job is not stopped unless remote cancellation is enabled,
//! and even then only on a best-effort basis.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use scriptreel_backend::api::GenerationBackend;
use scriptreel_backend::transport::ProgressTransport;
use scriptreel_core::script::JobInput;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::events::BatchEvent;
use crate::monitor::{JobMonitor, JobOutcome, ProgressSink};
use crate::state::{BatchState, BatchSummary, FailedItem};

/// Broadcast channel capacity for batch events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Errors reported synchronously, before any item is touched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchError {
    #[error("Batch has no items")]
    EmptyBatch,

    #[error("A batch is already running")]
    AlreadyRunning,

    #[error("No batch is running")]
    NotRunning,

    /// The batch task itself panicked or was aborted.
    #[error("Batch task ended abnormally: {0}")]
    Aborted(String),
}

/// Drives batches of generation jobs. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct BatchOrchestrator {
    monitor: Arc<JobMonitor>,
    backend: Arc<dyn GenerationBackend>,
    inner: Arc<Mutex<Inner>>,
    event_tx: broadcast::Sender<BatchEvent>,
    remote_cancel: bool,
}

struct Inner {
    state: BatchState,
    /// Cancellation token of the active run.
    cancel: Option<CancellationToken>,
}

impl BatchOrchestrator {
    pub fn new(backend: Arc<dyn GenerationBackend>, transport: Arc<dyn ProgressTransport>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            monitor: Arc::new(JobMonitor::new(Arc::clone(&backend), transport)),
            backend,
            inner: Arc::new(Mutex::new(Inner {
                state: BatchState::default(),
                cancel: None,
            })),
            event_tx,
            remote_cancel: false,
        }
    }

    /// Also ask the backend to cancel the abandoned job when a run is
    /// cancelled mid-item.
    pub fn with_remote_cancel(mut self, enabled: bool) -> Self {
        self.remote_cancel = enabled;
        self
    }

    /// Subscribe to batch events.
    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.event_tx.subscribe()
    }

    /// Copy of the current batch state.
    pub fn snapshot(&self) -> BatchState {
        self.lock().state.clone()
    }

    pub fn is_running(&self) -> bool {
        self.lock().state.is_running
    }

    /// Validate and begin a run on a background task.
    ///
    /// Must be called from within a Tokio runtime. Errors are returned
    /// before anything is spawned.
    pub fn start(
        &self,
        items: Vec<JobInput>,
    ) -> Result<tokio::task::JoinHandle<BatchSummary>, BatchError> {
        let (run_id, cancel) = self.begin(&items)?;
        let this = self.clone();
        Ok(tokio::spawn(async move {
            this.run_loop(run_id, items, cancel).await
        }))
    }

    /// Validate and run a batch to completion (or cancellation).
    ///
    /// The loop runs on its own task. Dropping the returned future cancels
    /// the batch, which then winds down and returns to idle in the
    /// background.
    pub async fn run(&self, items: Vec<JobInput>) -> Result<BatchSummary, BatchError> {
        let (run_id, cancel) = self.begin(&items)?;
        let cancel_on_drop = cancel.clone().drop_guard();
        let this = self.clone();
        let joined = tokio::spawn(async move { this.run_loop(run_id, items, cancel).await }).await;
        let _ = cancel_on_drop.disarm();
        joined.map_err(|e| {
            tracing::error!(%run_id, error = %e, "Batch task ended abnormally");
            BatchError::Aborted(e.to_string())
        })
    }

    /// Request cancellation of the active run.
    ///
    /// The in-flight item's progress stream closes right away and the item
    /// is abandoned. Items not yet started are skipped. Once the last item
    /// has resolved there is nothing left to cancel and this returns
    /// [`BatchError::NotRunning`].
    pub fn cancel(&self) -> Result<(), BatchError> {
        let mut inner = self.lock();
        match inner.cancel.as_ref() {
            Some(cancel) if inner.state.is_running => cancel.cancel(),
            _ => {
                tracing::warn!("Cancel requested with no cancellable batch running");
                return Err(BatchError::NotRunning);
            }
        }
        inner.state.current_message = "Cancelling batch".to_string();
        tracing::info!(
            run_id = ?inner.state.run_id,
            current_index = ?inner.state.current_index,
            "Batch cancellation requested",
        );
        Ok(())
    }

    // ---- private helpers ----

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: BatchEvent) {
        // Ignore the SendError; it only means there are zero receivers.
        let _ = self.event_tx.send(event);
    }

    /// Guard checks and state reset, atomically under the lock.
    fn begin(&self, items: &[JobInput]) -> Result<(Uuid, CancellationToken), BatchError> {
        if items.is_empty() {
            tracing::warn!("Refusing to start an empty batch");
            return Err(BatchError::EmptyBatch);
        }

        let run_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        {
            let mut inner = self.lock();
            if inner.state.is_running {
                tracing::warn!(
                    run_id = ?inner.state.run_id,
                    "Refusing to start a batch while another is running",
                );
                return Err(BatchError::AlreadyRunning);
            }
            let labels = items.iter().map(|i| i.source_label.clone()).collect();
            inner.state = BatchState::for_run(run_id, labels);
            inner.cancel = Some(cancel.clone());
        }

        tracing::info!(%run_id, total = items.len(), "Batch started");
        self.emit(BatchEvent::BatchStarted {
            run_id,
            total: items.len(),
        });
        Ok((run_id, cancel))
    }

    async fn run_loop(
        &self,
        run_id: Uuid,
        items: Vec<JobInput>,
        cancel: CancellationToken,
    ) -> BatchSummary {
        let total = items.len();
        let mut cancelled = false;

        for (index, item) in items.into_iter().enumerate() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let source_label = item.source_label.clone();
            self.enter_item(run_id, index, &source_label);

            let outcome = self.monitor_item(run_id, index, item, &cancel).await;
            if index + 1 == total && !matches!(outcome, JobOutcome::Abandoned { .. }) {
                // Past the last checkpoint; a cancel that already landed
                // still marks the run cancelled.
                cancelled = self.retire_cancel_token();
            }

            match outcome {
                JobOutcome::Completed { task_id, artifact } => {
                    self.record_completed(run_id, index, &source_label, task_id, artifact);
                }
                JobOutcome::Failed { reason, .. } => {
                    self.record_failed(run_id, index, &source_label, reason);
                }
                JobOutcome::Abandoned { task_id } => {
                    self.abandon(run_id, index, &source_label, task_id).await;
                    cancelled = true;
                    break;
                }
            }

            self.mark_processed(&source_label).await;
        }

        self.finish(run_id, total, cancelled)
    }

    fn enter_item(&self, run_id: Uuid, index: usize, source_label: &str) {
        {
            let mut inner = self.lock();
            inner.state.current_index = Some(index);
            inner.state.current_progress = 0.0;
            inner.state.current_message = format!("Starting {source_label}");
        }
        tracing::info!(%run_id, index, source = source_label, "Processing batch item");
        self.emit(BatchEvent::ItemStarted {
            run_id,
            index,
            source_label: source_label.to_string(),
            started_at: chrono::Utc::now(),
        });
    }

    /// Run the monitor on its own task so a panic inside it is contained
    /// to this item.
    async fn monitor_item(
        &self,
        run_id: Uuid,
        index: usize,
        item: JobInput,
        cancel: &CancellationToken,
    ) -> JobOutcome {
        let monitor = Arc::clone(&self.monitor);
        let sink = StateSink {
            inner: Arc::clone(&self.inner),
            event_tx: self.event_tx.clone(),
            run_id,
            index,
        };
        let cancel = cancel.clone();

        let handle = tokio::spawn(async move { monitor.run(&item, &sink, &cancel).await });
        match handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(%run_id, index, error = %e, "Job monitor task failed");
                JobOutcome::Failed {
                    task_id: None,
                    reason: format!("monitor task failed: {e}"),
                }
            }
        }
    }

    fn record_completed(
        &self,
        run_id: Uuid,
        index: usize,
        source_label: &str,
        task_id: String,
        artifact: String,
    ) {
        {
            let mut inner = self.lock();
            inner.state.completed.push(source_label.to_string());
            inner.state.current_message = format!("Completed {source_label}");
        }
        tracing::info!(%run_id, index, source = source_label, task_id = %task_id, artifact = %artifact, "Batch item completed");
        self.emit(BatchEvent::ItemCompleted {
            run_id,
            index,
            source_label: source_label.to_string(),
            task_id,
            artifact,
            finished_at: chrono::Utc::now(),
        });
    }

    fn record_failed(&self, run_id: Uuid, index: usize, source_label: &str, reason: String) {
        {
            let mut inner = self.lock();
            inner.state.failed.push(FailedItem {
                source_label: source_label.to_string(),
                reason: reason.clone(),
            });
            inner.state.current_message = format!("Failed {source_label}: {reason}");
        }
        tracing::warn!(%run_id, index, source = source_label, reason = %reason, "Batch item failed");
        self.emit(BatchEvent::ItemFailed {
            run_id,
            index,
            source_label: source_label.to_string(),
            reason,
            finished_at: chrono::Utc::now(),
        });
    }

    async fn abandon(
        &self,
        run_id: Uuid,
        index: usize,
        source_label: &str,
        task_id: Option<String>,
    ) {
        tracing::info!(%run_id, index, source = source_label, task_id = ?task_id, "Batch item abandoned");

        if self.remote_cancel {
            if let Some(task_id) = task_id.as_deref() {
                if let Err(e) = self.backend.cancel_task(task_id).await {
                    tracing::warn!(task_id, error = %e, "Remote cancellation failed");
                }
            }
        }

        self.emit(BatchEvent::ItemAbandoned {
            run_id,
            index,
            source_label: source_label.to_string(),
            task_id,
        });
    }

    /// Stop accepting cancel requests. Returns whether one was accepted
    /// before the token was retired.
    fn retire_cancel_token(&self) -> bool {
        self.lock()
            .cancel
            .take()
            .is_some_and(|token| token.is_cancelled())
    }

    /// Best-effort; never changes the item's classification.
    async fn mark_processed(&self, source_label: &str) {
        if let Err(e) = self.backend.mark_source_processed(source_label).await {
            tracing::warn!(source = source_label, error = %e, "Failed to mark source processed");
        }
    }

    fn finish(&self, run_id: Uuid, total: usize, cancelled: bool) -> BatchSummary {
        let summary = {
            let mut inner = self.lock();
            inner.state.is_running = false;
            inner.state.cancelled = cancelled;
            inner.cancel = None;
            inner.state.current_message = if cancelled {
                "Batch cancelled".to_string()
            } else {
                format!(
                    "Batch finished: {} completed, {} failed",
                    inner.state.completed.len(),
                    inner.state.failed.len()
                )
            };
            BatchSummary {
                run_id,
                total,
                completed: inner.state.completed.clone(),
                failed: inner.state.failed.clone(),
                cancelled,
            }
        };

        if cancelled {
            tracing::info!(
                %run_id,
                completed = summary.completed_count(),
                failed = summary.failed_count(),
                skipped = summary.skipped_count(),
                "Batch cancelled",
            );
            self.emit(BatchEvent::BatchCancelled {
                run_id,
                completed: summary.completed_count(),
                failed: summary.failed_count(),
                skipped: summary.skipped_count(),
            });
        } else {
            tracing::info!(
                %run_id,
                completed = summary.completed_count(),
                failed = summary.failed_count(),
                "Batch finished",
            );
            self.emit(BatchEvent::BatchFinished {
                run_id,
                completed: summary.completed_count(),
                failed: summary.failed_count(),
            });
        }
        summary
    }
}

/// Mirrors the in-flight job's progress into the batch state.
struct StateSink {
    inner: Arc<Mutex<Inner>>,
    event_tx: broadcast::Sender<BatchEvent>,
    run_id: Uuid,
    index: usize,
}

impl StateSink {
    /// Apply an update only while this sink's item is still current.
    fn update(&self, apply: impl FnOnce(&mut BatchState)) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let state = &mut inner.state;
        if state.is_running
            && state.run_id == Some(self.run_id)
            && state.current_index == Some(self.index)
        {
            apply(state);
            true
        } else {
            false
        }
    }
}

impl ProgressSink for StateSink {
    fn on_progress(&self, fraction: f64) {
        if self.update(|state| state.current_progress = fraction) {
            let _ = self.event_tx.send(BatchEvent::ItemProgress {
                run_id: self.run_id,
                index: self.index,
                progress: fraction,
            });
        }
    }

    fn on_message(&self, message: &str) {
        if self.update(|state| state.current_message = message.to_string()) {
            let _ = self.event_tx.send(BatchEvent::ItemMessage {
                run_id: self.run_id,
                index: self.index,
                message: message.to_string(),
            });
        }
    }
}
