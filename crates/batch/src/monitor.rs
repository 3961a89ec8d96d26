//! Single-job monitor.
//!
//! Submits one job, follows its progress stream, and resolves exactly one
//! [`JobOutcome`]. Every failure mode (rejected submission, backend-reported
//! failure, broken stream, timeout) folds into [`JobOutcome::Failed`]. No
//! retries: one submission, one channel, one outcome per call.

use std::sync::Arc;
use std::time::Duration;

use scriptreel_backend::api::GenerationBackend;
use scriptreel_backend::channel::{ChannelEvent, ProgressChannel};
use scriptreel_backend::transport::ProgressTransport;
use scriptreel_core::job_status::JobStatus;
use scriptreel_core::script::JobInput;
use tokio_util::sync::CancellationToken;

/// Wall-clock budget for one job, measured from the moment its progress
/// channel is opened.
pub const GENERATION_TIMEOUT: Duration = Duration::from_secs(10 * 60);

pub const TIMEOUT_REASON: &str = "timeout: generation exceeded time budget";

pub const MISSING_ARTIFACT_REASON: &str = "missing artifact locator";

/// Used when a `failed` frame carries no error text.
pub const GENERIC_FAILURE_REASON: &str = "generation failed";

/// Terminal result of one monitor run.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed { task_id: String, artifact: String },
    Failed {
        /// `None` when the submission itself was rejected.
        task_id: Option<String>,
        reason: String,
    },
    /// The run was cancelled while this job was in flight. The remote job
    /// may still be rendering.
    Abandoned { task_id: Option<String> },
}

impl JobOutcome {
    fn failed(task_id: Option<&str>, reason: impl Into<String>) -> Self {
        Self::Failed {
            task_id: task_id.map(str::to_string),
            reason: reason.into(),
        }
    }
}

/// Receives progress updates for the job being monitored.
///
/// Values are forwarded as received, including non-monotonic progress.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, fraction: f64);
    fn on_message(&self, message: &str);
}

/// Combines a [`GenerationBackend`] and a [`ProgressTransport`] to follow
/// one job to completion.
pub struct JobMonitor {
    backend: Arc<dyn GenerationBackend>,
    transport: Arc<dyn ProgressTransport>,
}

impl JobMonitor {
    pub fn new(backend: Arc<dyn GenerationBackend>, transport: Arc<dyn ProgressTransport>) -> Self {
        Self { backend, transport }
    }

    /// Run one job to a terminal outcome.
    ///
    /// Cancelling `cancel` abandons the job: the progress stream is torn
    /// down immediately and [`JobOutcome::Abandoned`] is returned. The
    /// stream is always closed by the time this returns.
    pub async fn run(
        &self,
        input: &JobInput,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> JobOutcome {
        let source = input.source_label.as_str();

        let submitted = tokio::select! {
            biased;
            _ = cancel.cancelled() => return JobOutcome::Abandoned { task_id: None },
            submitted = self.backend.submit(input) => submitted,
        };
        let task_id = match submitted {
            Ok(ack) => ack.task_id,
            Err(e) => {
                tracing::warn!(source, error = %e, "Job submission rejected");
                return JobOutcome::failed(None, e.to_string());
            }
        };

        let mut channel =
            ProgressChannel::new(task_id.clone(), Arc::clone(&self.transport), cancel.child_token());
        let mut events = match channel.connect() {
            Ok(events) => events,
            Err(e) => return JobOutcome::failed(Some(&task_id), e.to_string()),
        };

        let deadline = tokio::time::sleep(GENERATION_TIMEOUT);
        tokio::pin!(deadline);

        let outcome = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(source, task_id = %task_id, "Job abandoned by cancellation");
                    break JobOutcome::Abandoned { task_id: Some(task_id.clone()) };
                }
                _ = &mut deadline => {
                    tracing::warn!(
                        source,
                        task_id = %task_id,
                        timeout_secs = GENERATION_TIMEOUT.as_secs(),
                        "Job timed out",
                    );
                    break JobOutcome::failed(Some(&task_id), TIMEOUT_REASON);
                }
                event = events.recv() => match event {
                    Some(ChannelEvent::Frame(frame)) => {
                        sink.on_progress(frame.fraction());
                        if let Some(message) = frame.message.as_deref() {
                            sink.on_message(message);
                        }
                        match frame.status {
                            JobStatus::Completed => {
                                break match frame.artifact_locator() {
                                    Some(artifact) => JobOutcome::Completed {
                                        task_id: task_id.clone(),
                                        artifact,
                                    },
                                    None => {
                                        tracing::warn!(source, task_id = %task_id, "Completed frame without artifact locator");
                                        JobOutcome::failed(Some(&task_id), MISSING_ARTIFACT_REASON)
                                    }
                                };
                            }
                            JobStatus::Failed => {
                                let reason = frame.error_text().unwrap_or(GENERIC_FAILURE_REASON);
                                tracing::warn!(source, task_id = %task_id, reason, "Job failed on backend");
                                break JobOutcome::failed(Some(&task_id), reason);
                            }
                            JobStatus::Queued | JobStatus::Running => {}
                        }
                    }
                    Some(ChannelEvent::TransportError(message)) => {
                        break JobOutcome::failed(Some(&task_id), message);
                    }
                    None => {
                        // Pump stopped without a terminal frame or error.
                        break JobOutcome::failed(Some(&task_id), "progress channel closed unexpectedly");
                    }
                },
            }
        };

        // The stream must be released before the next job opens one.
        channel.shutdown().await;
        outcome
    }
}
