//! Sequential batch orchestration of remote generation jobs.
//!
//! [`monitor::JobMonitor`] drives a single job from submission to a
//! terminal outcome; [`orchestrator::BatchOrchestrator`] runs an ordered
//! list of jobs through it one at a time, keeps the shared
//! [`state::BatchState`], and broadcasts [`events::BatchEvent`]s.

pub mod events;
pub mod monitor;
pub mod orchestrator;
pub mod state;
