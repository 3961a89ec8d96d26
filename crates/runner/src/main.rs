//! `scriptreel-runner` -- renders pending scripts one after another.
//!
//! Loads script sources from the generation backend, submits each as a
//! video generation job, follows its progress over WebSocket, and logs a
//! summary when the batch ends. Ctrl-C cancels the batch: the job in
//! flight is abandoned and the rest are skipped.
//!
//! See [`RunnerConfig::from_env`] for the environment variables.

use std::sync::Arc;

use scriptreel_backend::api::BackendApi;
use scriptreel_backend::messages::progress_percent;
use scriptreel_backend::transport::WsTransport;
use scriptreel_batch::events::BatchEvent;
use scriptreel_batch::orchestrator::BatchOrchestrator;
use scriptreel_batch::state::BatchSummary;
use scriptreel_runner::config::RunnerConfig;
use scriptreel_runner::sources;
use tokio::sync::broadcast;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "scriptreel_runner=info,scriptreel_batch=info,scriptreel_backend=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run().await {
        Ok(summary) if summary.failed.is_empty() && !summary.cancelled => {}
        Ok(_) => std::process::exit(2),
        Err(e) => {
            tracing::error!(error = %e, "Runner failed");
            std::process::exit(1);
        }
    }
}

async fn run() -> anyhow::Result<BatchSummary> {
    let config = RunnerConfig::from_env()?;

    tracing::info!(
        api_url = %config.api_url,
        ws_url = %config.ws_url,
        remote_cancel = config.remote_cancel,
        "Starting scriptreel-runner",
    );

    let client = reqwest::Client::builder()
        .timeout(config.request_timeout())
        .build()?;
    let api = Arc::new(BackendApi::with_client(client, config.api_url.clone()));
    let transport = Arc::new(WsTransport::new(config.ws_url.clone()));

    let filenames = sources::select_sources(&api, config.script_files.as_deref()).await?;
    let loaded = sources::load_jobs(&api, &filenames, &config.options).await;
    if loaded.jobs.is_empty() {
        anyhow::bail!(
            "no script sources to process ({} skipped)",
            loaded.skipped.len()
        );
    }

    let orchestrator =
        BatchOrchestrator::new(api, transport).with_remote_cancel(config.remote_cancel);
    tokio::spawn(log_events(orchestrator.subscribe()));

    let batch = orchestrator.start(loaded.jobs)?;

    let canceller = orchestrator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, cancelling batch");
            if let Err(e) = canceller.cancel() {
                tracing::warn!(error = %e, "Cancel ignored");
            }
        }
    });

    let summary = batch.await?;

    for item in &summary.failed {
        tracing::warn!(source = %item.source_label, reason = %item.reason, "Failed");
    }
    for item in &loaded.skipped {
        tracing::warn!(source = %item.filename, reason = %item.reason, "Skipped before submission");
    }
    tracing::info!(
        run_id = %summary.run_id,
        total = summary.total,
        completed = summary.completed_count(),
        failed = summary.failed_count(),
        not_run = summary.skipped_count(),
        cancelled = summary.cancelled,
        "Batch summary",
    );

    Ok(summary)
}

/// Log per-item progress for the operator.
async fn log_events(mut rx: broadcast::Receiver<BatchEvent>) {
    loop {
        match rx.recv().await {
            Ok(BatchEvent::ItemStarted {
                index,
                source_label,
                ..
            }) => {
                tracing::info!(index, source = %source_label, "Rendering");
            }
            Ok(BatchEvent::ItemProgress {
                index, progress, ..
            }) => {
                tracing::debug!(index, percent = progress_percent(progress), "Progress");
            }
            Ok(BatchEvent::ItemMessage { index, message, .. }) => {
                tracing::debug!(index, message = %message, "Backend message");
            }
            Ok(BatchEvent::ItemCompleted {
                index, artifact, ..
            }) => {
                tracing::info!(index, artifact = %artifact, "Rendered");
            }
            Ok(BatchEvent::BatchFinished { .. } | BatchEvent::BatchCancelled { .. }) => break,
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::debug!(skipped = n, "Event log lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
