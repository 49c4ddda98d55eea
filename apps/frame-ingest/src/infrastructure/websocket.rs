//! WebSocket Event Source
//!
//! [`EventSource`] adapter over `tokio-tungstenite`. Text frames are handed
//! to the stream as-is; protocol pings are answered here so the stream only
//! sees application data.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::application::ports::{EventConnection, EventSource, StreamError};

/// Event source reached at a `ws://` or `wss://` URL.
#[derive(Debug, Clone)]
pub struct WebSocketSource {
    url: String,
}

impl WebSocketSource {
    /// Create a source for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl EventSource for WebSocketSource {
    type Connection = WebSocketConnection;

    async fn connect(&self) -> Result<Self::Connection, StreamError> {
        tracing::info!(url = %self.url, "Connecting to event source");
        let (ws, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| StreamError::Connect(e.to_string()))?;
        Ok(WebSocketConnection { ws })
    }

    fn endpoint(&self) -> String {
        self.url.clone()
    }
}

/// Live WebSocket connection.
pub struct WebSocketConnection {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl std::fmt::Debug for WebSocketConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConnection").finish_non_exhaustive()
    }
}

#[async_trait]
impl EventConnection for WebSocketConnection {
    async fn recv(&mut self) -> Option<Result<String, StreamError>> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(text.to_string())),
                Some(Ok(Message::Binary(data))) => {
                    return Some(Ok(String::from_utf8_lossy(&data).into_owned()));
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = self.ws.send(Message::Pong(data)).await {
                        return Some(Err(StreamError::Transport(e.to_string())));
                    }
                }
                Some(Ok(Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(?frame, "Server sent close frame");
                    return None;
                }
                Some(Err(e)) => return Some(Err(StreamError::Transport(e.to_string()))),
                None => return None,
            }
        }
    }

    async fn ping(&mut self) -> Result<(), StreamError> {
        self.ws
            .send(Message::Ping(vec![].into()))
            .await
            .map_err(|e| StreamError::Transport(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.ws.close(None).await {
            tracing::debug!(error = %e, "WebSocket close failed");
        }
    }
}
