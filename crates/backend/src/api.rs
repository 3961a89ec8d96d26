//! REST API client for the generation backend.
//!
//! Wraps job submission, source listing/fetching, the "mark processed"
//! bookkeeping call, and best-effort task cancellation using [`reqwest`].
//! The batch layer talks to the backend through the [`GenerationBackend`]
//! trait so it can be driven by in-memory fakes in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use scriptreel_core::script::{ConversationLine, JobInput, ScriptDocument, VideoSection};

/// HTTP client for one generation backend.
#[derive(Debug, Clone)]
pub struct BackendApi {
    client: reqwest::Client,
    api_url: String,
}

/// Body of the `POST /api/generate` request.
#[derive(Debug, Serialize)]
pub struct GenerateRequest<'a> {
    pub conversations: &'a [ConversationLine],
    pub sections: &'a [VideoSection],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<&'a str>,
    pub enable_subtitles: bool,
    pub conversation_mode: &'a str,
}

impl<'a> From<&'a JobInput> for GenerateRequest<'a> {
    fn from(input: &'a JobInput) -> Self {
        Self {
            conversations: &input.conversations,
            sections: &input.sections,
            title: input.title.as_deref(),
            enable_subtitles: input.enable_subtitles,
            conversation_mode: &input.conversation_mode,
        }
    }
}

/// Acknowledgement returned once the backend has accepted a job.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier, used to open the progress stream.
    pub task_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
}

/// One entry of the `GET /api/scripts` listing.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceSummary {
    pub filename: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub is_generated: bool,
}

#[derive(Debug, Serialize)]
struct SourceStatusUpdate {
    is_generated: bool,
}

/// Errors from the backend REST layer.
#[derive(Debug, thiserror::Error)]
pub enum BackendApiError {
    /// The HTTP request itself failed (network, DNS, TLS, decode).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend returned a non-2xx status code.
    #[error("Backend API error ({status}): {detail}")]
    ApiError {
        status: u16,
        /// Error detail extracted from the body, or the raw body.
        detail: String,
    },

    /// The backend acknowledged the job without a usable task id.
    #[error("Backend accepted the job but returned no task id")]
    MissingTaskId,

    #[error("Invalid backend URL: {0}")]
    InvalidUrl(String),
}

/// Operations the batch layer needs from the backend.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Submit one job. Returns as soon as the backend has queued it.
    async fn submit(&self, input: &JobInput) -> Result<SubmitResponse, BackendApiError>;

    /// Flag a source file as generated. Idempotent.
    async fn mark_source_processed(&self, filename: &str) -> Result<(), BackendApiError>;

    /// Ask the backend to stop a task. Not every backend honours this.
    async fn cancel_task(&self, task_id: &str) -> Result<(), BackendApiError>;
}

impl BackendApi {
    /// Create a new API client.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8000`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`]
    /// (timeouts, proxies and TLS settings come from the caller).
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        let api_url = api_url.into();
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// `POST /api/generate`.
    pub async fn submit_generation(
        &self,
        input: &JobInput,
    ) -> Result<SubmitResponse, BackendApiError> {
        let response = self
            .client
            .post(self.endpoint(&["api", "generate"])?)
            .json(&GenerateRequest::from(input))
            .send()
            .await?;

        let ack: SubmitResponse = Self::parse_response(response).await?;
        if ack.task_id.trim().is_empty() {
            return Err(BackendApiError::MissingTaskId);
        }

        tracing::info!(
            source = %input.source_label,
            task_id = %ack.task_id,
            status = %ack.status,
            "Generation job submitted",
        );
        Ok(ack)
    }

    /// `GET /api/scripts`.
    pub async fn list_sources(&self) -> Result<Vec<SourceSummary>, BackendApiError> {
        let response = self
            .client
            .get(self.endpoint(&["api", "scripts"])?)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// `GET /api/scripts/{filename}`.
    pub async fn fetch_source(&self, filename: &str) -> Result<ScriptDocument, BackendApiError> {
        let response = self
            .client
            .get(self.endpoint(&["api", "scripts", filename])?)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// `PUT /api/scripts/{filename}/status` with `{"is_generated": true}`.
    pub async fn mark_processed(&self, filename: &str) -> Result<(), BackendApiError> {
        let response = self
            .client
            .put(self.endpoint(&["api", "scripts", filename, "status"])?)
            .json(&SourceStatusUpdate { is_generated: true })
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// `POST /api/tasks/{task_id}/cancel`.
    pub async fn cancel(&self, task_id: &str) -> Result<(), BackendApiError> {
        let response = self
            .client
            .post(self.endpoint(&["api", "tasks", task_id, "cancel"])?)
            .send()
            .await?;

        Self::check_status(response).await
    }

    // ---- private helpers ----

    /// Build an endpoint URL, percent-encoding each path segment.
    fn endpoint(&self, segments: &[&str]) -> Result<reqwest::Url, BackendApiError> {
        let mut url = reqwest::Url::parse(&self.api_url)
            .map_err(|e| BackendApiError::InvalidUrl(format!("{}: {e}", self.api_url)))?;
        url.path_segments_mut()
            .map_err(|_| BackendApiError::InvalidUrl(self.api_url.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Return the response unchanged on success, or an
    /// [`BackendApiError::ApiError`] carrying the status and error detail.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, BackendApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(BackendApiError::ApiError {
                status: status.as_u16(),
                detail: error_detail(&body),
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, BackendApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    async fn check_status(response: reqwest::Response) -> Result<(), BackendApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

#[async_trait]
impl GenerationBackend for BackendApi {
    async fn submit(&self, input: &JobInput) -> Result<SubmitResponse, BackendApiError> {
        self.submit_generation(input).await
    }

    async fn mark_source_processed(&self, filename: &str) -> Result<(), BackendApiError> {
        self.mark_processed(filename).await
    }

    async fn cancel_task(&self, task_id: &str) -> Result<(), BackendApiError> {
        self.cancel(task_id).await
    }
}

/// Pull a human-readable reason out of an error body.
///
/// Understands `{"detail": "..."}`, `{"error": "..."}` and
/// `{"message": "..."}`; anything else is returned trimmed as-is.
fn error_detail(body: &str) -> String {
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["detail", "error", "message"] {
            if let Some(serde_json::Value::String(text)) = map.get(key) {
                if !text.is_empty() {
                    return text.clone();
                }
            }
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "<empty body>".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_detail_prefers_detail_field() {
        assert_eq!(error_detail(r#"{"detail":"bad script"}"#), "bad script");
        assert_eq!(error_detail(r#"{"error":"boom","message":"ignored"}"#), "boom");
    }

    #[test]
    fn error_detail_falls_back_to_raw_body() {
        assert_eq!(error_detail("  gateway timeout \n"), "gateway timeout");
        assert_eq!(error_detail(r#"{"detail":""}"#), r#"{"detail":""}"#);
        assert_eq!(error_detail(""), "<empty body>");
    }

    #[test]
    fn endpoint_encodes_filename_segments() {
        let api = BackendApi::new("http://localhost:8000/");
        let url = api.endpoint(&["api", "scripts", "my script.json", "status"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8000/api/scripts/my%20script.json/status"
        );
    }

    #[test]
    fn endpoint_rejects_unparseable_base() {
        let api = BackendApi::new("not a url");
        assert!(matches!(
            api.endpoint(&["api"]),
            Err(BackendApiError::InvalidUrl(_))
        ));
    }

    #[test]
    fn generate_request_omits_missing_title() {
        let input = JobInput {
            source_label: "a.json".into(),
            conversations: vec![],
            sections: vec![],
            title: None,
            enable_subtitles: false,
            conversation_mode: "dialogue".into(),
        };
        let json = serde_json::to_value(GenerateRequest::from(&input)).unwrap();
        assert!(json.get("title").is_none());
        assert!(json.get("source_label").is_none());
        assert_eq!(json["enable_subtitles"], false);
        assert_eq!(json["conversation_mode"], "dialogue");
    }
}
