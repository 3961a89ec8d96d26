//! Progress stream transports.
//!
//! A [`ProgressTransport`] opens the server-push stream for one task and
//! yields its raw text frames. [`WsTransport`] is the production
//! implementation over WebSocket; the stream ends when the server closes
//! the connection and dropping it closes the socket.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::channel::ChannelError;

/// Raw text frames from one task's progress stream.
pub type FrameStream = BoxStream<'static, Result<String, ChannelError>>;

/// Opens the push stream for a task.
#[async_trait]
pub trait ProgressTransport: Send + Sync {
    async fn open(&self, task_id: &str) -> Result<FrameStream, ChannelError>;
}

/// WebSocket transport connecting to `{ws_url}/ws/progress/{task_id}`.
#[derive(Debug, Clone)]
pub struct WsTransport {
    ws_url: String,
}

impl WsTransport {
    /// * `ws_url` - WebSocket base URL, e.g. `ws://host:8000`.
    pub fn new(ws_url: impl Into<String>) -> Self {
        let ws_url = ws_url.into();
        Self {
            ws_url: ws_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Full stream URL for a task.
    pub fn task_url(&self, task_id: &str) -> String {
        format!("{}/ws/progress/{}", self.ws_url, task_id)
    }
}

#[async_trait]
impl ProgressTransport for WsTransport {
    async fn open(&self, task_id: &str) -> Result<FrameStream, ChannelError> {
        let url = self.task_url(task_id);
        let (ws_stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| ChannelError::Transport(format!("Failed to connect to {url}: {e}")))?;

        tracing::debug!(task_id, url = %url, "Progress stream connected");

        let task_id = task_id.to_string();
        let frames = futures::stream::unfold(Some(ws_stream), move |state| {
            let task_id = task_id.clone();
            async move {
                let Some(mut ws_stream) = state else {
                    return None;
                };
                loop {
                    match ws_stream.next().await {
                        Some(Ok(Message::Text(text))) => return Some((Ok(text), Some(ws_stream))),
                        Some(Ok(Message::Close(frame))) => {
                            tracing::debug!(task_id = %task_id, ?frame, "Progress stream closed by server");
                            return None;
                        }
                        Some(Ok(Message::Binary(_))) => {
                            tracing::trace!(task_id = %task_id, "Ignoring binary frame");
                        }
                        // Ping/Pong are answered by tungstenite.
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            return Some((Err(ChannelError::Transport(e.to_string())), None));
                        }
                        None => return None,
                    }
                }
            }
        });

        Ok(frames.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_url_joins_base_and_id() {
        let transport = WsTransport::new("ws://localhost:8000/");
        assert_eq!(transport.task_url("abc"), "ws://localhost:8000/ws/progress/abc");
    }
}
