//! WebSocket transport to the gateway

use crate::error::GatewayError;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One open connection; exclusively owned by a `GatewaySession`
pub struct WsConnection {
    stream: WsStream,
}

impl WsConnection {
    /// Open the socket and complete the upgrade within `timeout`
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let connect_error = |reason: String| GatewayError::Connect {
            url: url.to_string(),
            reason,
        };

        let (stream, _) = tokio::time::timeout(timeout, connect_async(url))
            .await
            .map_err(|_| connect_error(format!("no handshake within {:?}", timeout)))?
            .map_err(|e| connect_error(e.to_string()))?;
        Ok(Self { stream })
    }

    pub async fn send_json<T: Serialize>(&mut self, message: &T) -> Result<(), GatewayError> {
        let json = serde_json::to_string(message)?;
        self.stream.send(Message::Text(json)).await?;
        Ok(())
    }

    /// Next text frame, or `None` once the gateway has closed the socket
    pub async fn recv_text(&mut self) -> Result<Option<String>, GatewayError> {
        while let Some(frame) = self.stream.next().await {
            match frame? {
                Message::Text(text) => return Ok(Some(text)),
                Message::Close(_) => return Ok(None),
                // Ping/pong are answered by tungstenite; binary frames are not part of the protocol
                _ => continue,
            }
        }
        Ok(None)
    }

    pub async fn close(mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!("Error while closing gateway connection: {}", e);
        }
    }
}
