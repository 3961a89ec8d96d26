//! Single-task progress channel.
//!
//! [`ProgressChannel`] owns at most one open progress stream for one task.
//! [`connect`](ProgressChannel::connect) spawns a pump that opens the stream
//! through a [`ProgressTransport`], decodes each text frame, and forwards
//! [`ChannelEvent`]s to the returned receiver.
//!
//! The pump stops (and the stream is dropped, closing the connection) when
//! it delivers a terminal frame, when the transport errors or ends, or when
//! the channel is closed or its parent cancellation token fires. Use
//! [`shutdown`](ProgressChannel::shutdown) to also wait for the stream to be
//! released. Malformed frames are logged and skipped.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::messages::{parse_frame, ProgressFrame};
use crate::transport::{FrameStream, ProgressTransport};

/// Reason reported when the server ends the stream before a terminal frame.
pub const CLOSED_BEFORE_TERMINAL: &str = "progress stream closed before a terminal frame";

/// Something the consumer of a channel needs to react to.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// A decoded frame, delivered in transport order.
    Frame(ProgressFrame),
    /// The stream could not be opened or broke before a terminal frame.
    /// No further events follow.
    TransportError(String),
}

/// Errors raised by the channel and its transports.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelError {
    /// `connect` was called while a stream is still active.
    #[error("Progress channel for task {0} is already connected")]
    AlreadyConnected(String),

    /// Connection refused, reset, or a protocol error.
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Progress stream for one task.
pub struct ProgressChannel {
    task_id: String,
    transport: Arc<dyn ProgressTransport>,
    /// Parent token; cancelling it tears down any active stream.
    parent: CancellationToken,
    active: Option<ActiveStream>,
}

struct ActiveStream {
    cancel: CancellationToken,
    task_handle: tokio::task::JoinHandle<()>,
}

impl ActiveStream {
    fn is_live(&self) -> bool {
        !self.cancel.is_cancelled() && !self.task_handle.is_finished()
    }
}

impl ProgressChannel {
    pub fn new(
        task_id: impl Into<String>,
        transport: Arc<dyn ProgressTransport>,
        parent: CancellationToken,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            transport,
            parent,
            active: None,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Start streaming. Must be called from within a Tokio runtime.
    ///
    /// Returns immediately; opening failures arrive as
    /// [`ChannelEvent::TransportError`] on the receiver. The receiver
    /// yields `None` once the pump has stopped.
    pub fn connect(&mut self) -> Result<mpsc::UnboundedReceiver<ChannelEvent>, ChannelError> {
        if self.active.as_ref().is_some_and(ActiveStream::is_live) {
            return Err(ChannelError::AlreadyConnected(self.task_id.clone()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = self.parent.child_token();
        let pump_cancel = cancel.clone();
        let transport = Arc::clone(&self.transport);
        let task_id = self.task_id.clone();

        let task_handle = tokio::spawn(async move {
            pump(transport.as_ref(), &task_id, &tx, &pump_cancel).await;
            pump_cancel.cancel();
        });

        self.active = Some(ActiveStream {
            cancel,
            task_handle,
        });
        Ok(rx)
    }

    /// Close the stream if one is open. Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        if let Some(active) = self.active.take() {
            if active.is_live() {
                tracing::debug!(task_id = %self.task_id, "Disconnecting progress stream");
            }
            active.cancel.cancel();
        }
    }

    /// Close the stream and wait until the pump has released it.
    ///
    /// After this returns the underlying transport stream has been dropped.
    pub async fn shutdown(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.cancel.cancel();
        if let Err(e) = active.task_handle.await {
            tracing::warn!(task_id = %self.task_id, error = %e, "Progress pump ended abnormally");
        }
    }

    /// Whether a stream is open (or still being opened).
    pub fn is_connected(&self) -> bool {
        self.active.as_ref().is_some_and(ActiveStream::is_live)
    }
}

impl Drop for ProgressChannel {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Open the stream and forward decoded frames until a stop condition.
async fn pump(
    transport: &dyn ProgressTransport,
    task_id: &str,
    tx: &mpsc::UnboundedSender<ChannelEvent>,
    cancel: &CancellationToken,
) {
    let opened = tokio::select! {
        _ = cancel.cancelled() => return,
        opened = transport.open(task_id) => opened,
    };
    let mut stream: FrameStream = match opened {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(task_id, error = %e, "Failed to open progress stream");
            let _ = tx.send(ChannelEvent::TransportError(e.to_string()));
            return;
        }
    };

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(text)) => {
                let frame = match parse_frame(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(
                            task_id,
                            error = %e,
                            raw_message = %text,
                            "Dropping malformed progress frame",
                        );
                        continue;
                    }
                };

                if !frame.task_id.is_empty() && frame.task_id != task_id {
                    tracing::warn!(
                        task_id,
                        frame_task_id = %frame.task_id,
                        "Dropping progress frame addressed to another task",
                    );
                    continue;
                }

                let terminal = frame.status.is_terminal();
                tracing::debug!(
                    task_id,
                    status = %frame.status,
                    progress = frame.fraction(),
                    "Progress frame",
                );
                if tx.send(ChannelEvent::Frame(frame)).is_err() {
                    // Receiver dropped; nobody is listening.
                    return;
                }
                if terminal {
                    tracing::debug!(task_id, "Terminal frame delivered, closing stream");
                    return;
                }
            }
            Some(Err(e)) => {
                tracing::warn!(task_id, error = %e, "Progress stream error");
                let _ = tx.send(ChannelEvent::TransportError(e.to_string()));
                return;
            }
            None => {
                tracing::warn!(task_id, "Progress stream ended before a terminal frame");
                let _ = tx.send(ChannelEvent::TransportError(
                    CLOSED_BEFORE_TERMINAL.to_string(),
                ));
                return;
            }
        }
    }
}
