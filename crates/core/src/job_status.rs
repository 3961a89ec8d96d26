//! Job status vocabulary shared by the progress stream and the batch layer.
//!
//! The backend reports status as a free-form string. Anything it sends
//! that we do not recognise is treated as [`JobStatus::Running`] so that a
//! new server-side state never breaks an in-flight job.

use serde::{Deserialize, Deserializer, Serialize};

/// Job accepted but not yet picked up by a render worker.
pub const JOB_STATUS_QUEUED: &str = "queued";

/// Job is rendering.
pub const JOB_STATUS_RUNNING: &str = "running";

/// Job finished and produced an artifact.
pub const JOB_STATUS_COMPLETED: &str = "completed";

/// Job finished with an error.
pub const JOB_STATUS_FAILED: &str = "failed";

/// Lifecycle state of one remote generation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// Lenient parse: unknown values map to `Running`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            JOB_STATUS_QUEUED => Self::Queued,
            JOB_STATUS_RUNNING => Self::Running,
            JOB_STATUS_COMPLETED => Self::Completed,
            JOB_STATUS_FAILED => Self::Failed,
            _ => Self::Running,
        }
    }

    /// Wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => JOB_STATUS_QUEUED,
            Self::Running => JOB_STATUS_RUNNING,
            Self::Completed => JOB_STATUS_COMPLETED,
            Self::Failed => JOB_STATUS_FAILED,
        }
    }

    /// `completed` and `failed` are terminal; no frames follow them.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl<'de> Deserialize<'de> for JobStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
