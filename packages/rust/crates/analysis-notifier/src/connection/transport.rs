//! Push-channel transport seam and its WebSocket implementation.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::error::TransportError;

/// Inbound text frames of one established channel. The stream ending (or
/// yielding an error) means the channel closed.
pub type PushStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// Opens push-channel connections.
#[async_trait]
pub trait PushConnector: Send + Sync {
    /// Establish one connection.
    async fn connect(&self) -> Result<PushStream, TransportError>;

    /// Human-readable endpoint for logs.
    fn endpoint(&self) -> String {
        "push-channel".to_string()
    }
}

/// WebSocket push channel (`ws://host/ws`).
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    /// Connector for `url`; a bare `host:port/path` gets `ws://` prefixed.
    pub fn new(url: &str) -> Self {
        let url = if url.starts_with("ws://") || url.starts_with("wss://") {
            url.to_string()
        } else {
            format!("ws://{url}")
        };
        Self { url }
    }

    /// Normalized URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PushConnector for WsConnector {
    async fn connect(&self) -> Result<PushStream, TransportError> {
        let (ws_stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;

        let frames = ws_stream.filter_map(|message| async move {
            match message {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => Some(Ok(text)),
                    Err(_) => {
                        tracing::debug!(
                            event = "notifier.transport.binary_discarded",
                            len = bytes.len(),
                            "non-utf8 binary frame discarded"
                        );
                        None
                    }
                },
                Ok(Message::Close(_)) => Some(Err(TransportError::Closed)),
                Ok(_) => None,
                Err(error) => Some(Err(TransportError::Stream(error.to_string()))),
            }
        });
        Ok(Box::pin(frames))
    }

    fn endpoint(&self) -> String {
        self.url.clone()
    }
}
