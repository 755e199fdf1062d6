use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, trace};
use url::Url;

use super::{Connector, Payload, TransportError, WorkerLink};

/// Connects to the worker over a plain or TLS websocket.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, endpoint: &Url) -> Result<Box<dyn WorkerLink>, TransportError> {
        let (stream, response) =
            connect_async(endpoint.as_str())
                .await
                .map_err(|source| TransportError::Connect {
                    endpoint: endpoint.to_string(),
                    source,
                })?;
        debug!(status = %response.status(), "websocket upgraded");
        Ok(Box::new(WebSocketLink { stream }))
    }
}

struct WebSocketLink {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl WorkerLink for WebSocketLink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.stream.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<Payload, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(Payload::Text(text))),
                // Decoded by the session; invalid UTF-8 is a malformed frame there.
                Ok(Message::Binary(bytes)) => return Some(Ok(Payload::Binary(bytes))),
                Ok(Message::Close(frame)) => {
                    debug!(reason = ?frame.map(|f| f.reason.to_string()), "worker sent close frame");
                    return None;
                }
                Ok(other) => {
                    trace!(kind = ?other, "ignoring control frame");
                }
                Err(err) => return Some(Err(err.into())),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(err) = self.stream.close(None).await {
            debug!(error = %err, "websocket close handshake failed");
        }
    }
}
