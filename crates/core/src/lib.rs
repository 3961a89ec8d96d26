//! Shared domain types for the scriptreel batch generation client.
//!
//! Holds the script/job payload model, job status vocabulary, and the
//! common [`CoreError`](error::CoreError) used by the other crates.

pub mod error;
pub mod job_status;
pub mod script;
pub mod types;
