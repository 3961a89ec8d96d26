//! Generation backend client library.
//!
//! Provides the REST wrapper for job submission and source bookkeeping,
//! typed progress frame parsing, the WebSocket progress transport, and
//! the single-job [`ProgressChannel`](channel::ProgressChannel).

pub mod api;
pub mod channel;
pub mod messages;
pub mod transport;
