//! Shared in-memory fakes for batch integration tests.
//!
//! [`FakeBackend`] answers submissions from a per-source script and records
//! every call; [`FakeTransport`] replays scripted frames per task id and
//! tracks how many streams are open at once. Both append to a shared
//! [`Journal`] so tests can assert cross-component ordering.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use scriptreel_backend::api::{BackendApiError, GenerationBackend, SubmitResponse};
use scriptreel_backend::channel::ChannelError;
use scriptreel_backend::transport::{FrameStream, ProgressTransport};
use scriptreel_core::script::{ConversationLine, JobInput};

// ---------------------------------------------------------------------------
// Journal
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

pub enum Submit {
    /// Accept and assign `task-{label}`.
    Accept,
    Reject(&'static str),
    /// Simulate a bug in the submission path.
    Panic,
}

pub struct FakeBackend {
    journal: Journal,
    plans: Mutex<HashMap<String, Submit>>,
    pub fail_mark_processed: bool,
    /// How long each bookkeeping call takes.
    pub mark_delay: Duration,
    pub submitted: Mutex<Vec<String>>,
    pub marked: Mutex<Vec<String>>,
    pub cancelled: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            plans: Mutex::new(HashMap::new()),
            fail_mark_processed: false,
            mark_delay: Duration::ZERO,
            submitted: Mutex::new(Vec::new()),
            marked: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
        }
    }

    pub fn plan(self, label: &str, submit: Submit) -> Self {
        self.plans.lock().unwrap().insert(label.to_string(), submit);
        self
    }

    pub fn task_id(label: &str) -> String {
        format!("task-{label}")
    }
}

#[async_trait]
impl GenerationBackend for FakeBackend {
    async fn submit(&self, input: &JobInput) -> Result<SubmitResponse, BackendApiError> {
        let label = input.source_label.clone();
        self.journal.push(format!("submit:{label}"));
        self.submitted.lock().unwrap().push(label.clone());

        // Decide before panicking so the plan lock is not poisoned.
        let decision = match self.plans.lock().unwrap().get(&label) {
            Some(Submit::Reject(reason)) => Err(Some(*reason)),
            Some(Submit::Panic) => Err(None),
            Some(Submit::Accept) | None => Ok(()),
        };
        match decision {
            Ok(()) => {}
            Err(Some(reason)) => {
                return Err(BackendApiError::ApiError {
                    status: 500,
                    detail: reason.to_string(),
                })
            }
            Err(None) => panic!("submission exploded for {label}"),
        }

        Ok(SubmitResponse {
            task_id: Self::task_id(&label),
            status: "queued".into(),
            message: String::new(),
        })
    }

    async fn mark_source_processed(&self, filename: &str) -> Result<(), BackendApiError> {
        self.marked.lock().unwrap().push(filename.to_string());
        if !self.mark_delay.is_zero() {
            tokio::time::sleep(self.mark_delay).await;
        }
        if self.fail_mark_processed {
            return Err(BackendApiError::ApiError {
                status: 503,
                detail: "bookkeeping unavailable".into(),
            });
        }
        Ok(())
    }

    async fn cancel_task(&self, task_id: &str) -> Result<(), BackendApiError> {
        self.cancelled.lock().unwrap().push(task_id.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub enum Step {
    /// Send a raw text frame.
    Frame(String),
    Wait(Duration),
    Error(&'static str),
    /// Never send anything else; keep the stream open.
    Hang,
}

pub fn running(task: &str, progress: f64, message: &str) -> Step {
    Step::Frame(format!(
        r#"{{"task_id":"{task}","status":"running","progress":{progress},"message":"{message}"}}"#
    ))
}

pub fn completed(task: &str, artifact: &str) -> Step {
    Step::Frame(format!(
        r#"{{"task_id":"{task}","status":"completed","progress":1.0,"result":{{"video_url":"{artifact}"}}}}"#
    ))
}

pub fn failed(task: &str, error: &str) -> Step {
    Step::Frame(format!(
        r#"{{"task_id":"{task}","status":"failed","progress":0.5,"error":"{error}"}}"#
    ))
}

/// Decrements the open-stream gauge when the stream is dropped.
struct OpenGuard(Arc<AtomicUsize>);

impl Drop for OpenGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct FakeTransport {
    journal: Journal,
    scripts: Mutex<HashMap<String, Vec<Step>>>,
    open_now: Arc<AtomicUsize>,
    pub max_open: Arc<AtomicUsize>,
    pub opened: Mutex<Vec<String>>,
}

impl FakeTransport {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            scripts: Mutex::new(HashMap::new()),
            open_now: Arc::new(AtomicUsize::new(0)),
            max_open: Arc::new(AtomicUsize::new(0)),
            opened: Mutex::new(Vec::new()),
        }
    }

    /// Script the stream for the task assigned to `label`.
    pub fn script(self, label: &str, steps: Vec<Step>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(FakeBackend::task_id(label), steps);
        self
    }

    pub fn open_now(&self) -> usize {
        self.open_now.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProgressTransport for FakeTransport {
    async fn open(&self, task_id: &str) -> Result<FrameStream, ChannelError> {
        self.journal.push(format!("open:{task_id}"));
        self.opened.lock().unwrap().push(task_id.to_string());

        let now = self.open_now.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_open.fetch_max(now, Ordering::SeqCst);
        let guard = OpenGuard(Arc::clone(&self.open_now));

        let steps = self
            .scripts
            .lock()
            .unwrap()
            .get(task_id)
            .cloned()
            .unwrap_or_else(|| vec![Step::Hang]);
        let journal = self.journal.clone();
        let task = task_id.to_string();

        let stream = futures::stream::unfold(steps.into_iter(), move |mut steps| {
            let journal = journal.clone();
            let task = task.clone();
            async move {
                loop {
                    let Some(step) = steps.next() else {
                        return None;
                    };
                    match step {
                        Step::Frame(text) => {
                            if text.contains(r#""status":"completed""#)
                                || text.contains(r#""status":"failed""#)
                            {
                                journal.push(format!("terminal:{task}"));
                            }
                            return Some((Ok(text), steps));
                        }
                        Step::Wait(d) => tokio::time::sleep(d).await,
                        Step::Error(msg) => {
                            return Some((Err(ChannelError::Transport(msg.to_string())), steps))
                        }
                        Step::Hang => futures::future::pending::<()>().await,
                    }
                }
            }
        });

        Ok(stream
            .map(move |item| {
                let _open = &guard;
                item
            })
            .boxed())
    }
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

pub fn job(label: &str) -> JobInput {
    JobInput {
        source_label: label.to_string(),
        conversations: vec![ConversationLine {
            speaker: "narrator".into(),
            text: format!("Line for {label}"),
            voice_text: None,
            expression: None,
            section: Some("main".into()),
        }],
        sections: vec![],
        title: None,
        enable_subtitles: true,
        conversation_mode: "dialogue".into(),
    }
}

pub fn jobs(labels: &[&str]) -> Vec<JobInput> {
    labels.iter().map(|l| job(l)).collect()
}
