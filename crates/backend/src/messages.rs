//! Progress frame types and parser.
//!
//! The backend pushes JSON frames of the shape
//! `{"task_id", "status", "progress", "message"?, "result"?, "error"?}`
//! over the per-task progress stream.

use serde::Deserialize;
use scriptreel_core::job_status::JobStatus;

/// Keys searched, in order, for an artifact locator inside an object
/// `result`.
const LOCATOR_KEYS: &[&str] = &["video_url", "url", "video_path", "output_path", "path"];

/// One push message describing a task's current state.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressFrame {
    #[serde(default)]
    pub task_id: String,
    /// Unknown values decode as [`JobStatus::Running`].
    pub status: JobStatus,
    /// Nominally in `[0.0, 1.0]`. Not guaranteed monotonic.
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
    /// Present on `completed` frames.
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    /// Present on `failed` frames.
    #[serde(default)]
    pub error: Option<String>,
}

impl ProgressFrame {
    /// Progress clamped to `[0.0, 1.0]`; non-finite values read as `0.0`.
    pub fn fraction(&self) -> f64 {
        match self.progress {
            Some(p) if p.is_finite() => p.clamp(0.0, 1.0),
            _ => 0.0,
        }
    }

    /// Locator of the produced artifact, if the result carries a usable one.
    ///
    /// Accepts either a bare string result or an object with one of the
    /// [`LOCATOR_KEYS`]. Blank strings do not count.
    pub fn artifact_locator(&self) -> Option<String> {
        let result = self.result.as_ref()?;
        let locator = match result {
            serde_json::Value::String(s) => Some(s.as_str()),
            serde_json::Value::Object(map) => LOCATOR_KEYS
                .iter()
                .filter_map(|key| map.get(*key).and_then(|v| v.as_str()))
                .find(|s| !s.trim().is_empty()),
            _ => None,
        }?;
        let locator = locator.trim();
        (!locator.is_empty()).then(|| locator.to_string())
    }

    /// Backend-supplied failure text, if non-blank.
    pub fn error_text(&self) -> Option<&str> {
        self.error.as_deref().map(str::trim).filter(|e| !e.is_empty())
    }
}

/// Whole-number percentage for display, clamped to `0..=100`.
pub fn progress_percent(fraction: f64) -> u8 {
    if !fraction.is_finite() {
        return 0;
    }
    (fraction.clamp(0.0, 1.0) * 100.0).round() as u8
}

/// Parse a progress stream text frame.
///
/// Returns `Err` for malformed JSON or frames without a `status`.
/// Callers should log and drop these.
pub fn parse_frame(text: &str) -> Result<ProgressFrame, serde_json::Error> {
    serde_json::from_str(text)
}
