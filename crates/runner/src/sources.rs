//! Turns backend script sources into batch job inputs.

use scriptreel_backend::api::{BackendApi, BackendApiError};
use scriptreel_core::script::{GenerationOptions, JobInput};

/// A source that could not be turned into a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedSource {
    pub filename: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct LoadedSources {
    /// Jobs in processing order.
    pub jobs: Vec<JobInput>,
    pub skipped: Vec<SkippedSource>,
}

/// Resolve which files to process.
///
/// With an explicit list the backend listing is not consulted. Otherwise
/// every listed source not yet generated is selected, in listing order.
pub async fn select_sources(
    api: &BackendApi,
    explicit: Option<&[String]>,
) -> Result<Vec<String>, BackendApiError> {
    if let Some(files) = explicit {
        return Ok(files.to_vec());
    }

    let listed = api.list_sources().await?;
    let total = listed.len();
    let pending: Vec<String> = listed
        .into_iter()
        .filter(|s| !s.is_generated)
        .map(|s| s.filename)
        .collect();
    tracing::info!(total, pending = pending.len(), "Listed script sources");
    Ok(pending)
}

/// Fetch and validate each file. A source that cannot be fetched or fails
/// validation is skipped; it does not abort loading the others.
pub async fn load_jobs(
    api: &BackendApi,
    filenames: &[String],
    options: &GenerationOptions,
) -> LoadedSources {
    let mut loaded = LoadedSources::default();

    for filename in filenames {
        let result = match api.fetch_source(filename).await {
            Ok(document) => JobInput::from_script(filename.as_str(), document, options)
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match result {
            Ok(job) => loaded.jobs.push(job),
            Err(reason) => {
                tracing::warn!(source = %filename, reason = %reason, "Skipping script source");
                loaded.skipped.push(SkippedSource {
                    filename: filename.clone(),
                    reason,
                });
            }
        }
    }

    loaded
}
