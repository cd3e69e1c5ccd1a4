//! WebSocket Stream Transport
//!
//! tokio-tungstenite adapter behind the [`StreamTransport`] port. Produces
//! one fresh connection per call; reconnection policy lives in the
//! ingestion client.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::application::ports::{ProviderError, StreamConnection, StreamTransport, TransportEvent};

/// WebSocket transport for the primary provider's push feed.
#[derive(Debug, Clone)]
pub struct WsTransport {
    url: String,
}

impl WsTransport {
    /// Create a transport for a feed URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// The configured feed URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl StreamTransport for WsTransport {
    async fn connect(&self) -> Result<Box<dyn StreamConnection>, ProviderError> {
        tracing::info!(url = %self.url, "Connecting to push feed");

        let (stream, _response) = tokio_tungstenite::connect_async(&self.url)
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(Box::new(WsConnection { inner: stream }))
    }
}

struct WsConnection {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl StreamConnection for WsConnection {
    async fn send_text(&mut self, payload: String) -> Result<(), ProviderError> {
        self.inner
            .send(Message::Text(payload.into()))
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))
    }

    async fn send_ping(&mut self) -> Result<(), ProviderError> {
        self.inner
            .send(Message::Ping(vec![].into()))
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))
    }

    async fn next_event(&mut self) -> Option<Result<TransportEvent, ProviderError>> {
        loop {
            match self.inner.next().await? {
                Ok(Message::Text(text)) => {
                    return Some(Ok(TransportEvent::Message(text.to_string())));
                }
                Ok(Message::Pong(_)) => return Some(Ok(TransportEvent::Pong)),
                Ok(Message::Ping(data)) => {
                    // Answer transport-level pings inline.
                    if let Err(e) = self.inner.send(Message::Pong(data)).await {
                        return Some(Err(ProviderError::Network(e.to_string())));
                    }
                }
                Ok(Message::Close(_)) => return Some(Ok(TransportEvent::Closed)),
                Ok(_) => {
                    // Binary and raw frames are not part of the feed protocol.
                }
                Err(e) => return Some(Err(ProviderError::Network(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.inner.close(None).await;
    }
}
