//! WebSocket Module
//!
//! WebSocket transport for the exchange API. Requests go out as JSON text
//! frames and every inbound text (or binary) frame is decoded as a response.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use crate::protocol::{Request, Response};
use crate::transport::{FrameSink, FrameSource, TransportError};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Write half of a WebSocket connection
pub struct WsSink {
    inner: SplitSink<Socket, Message>,
}

/// Read half of a WebSocket connection
pub struct WsSource {
    inner: SplitStream<Socket>,
}

/// Open a WebSocket connection and split it into sink and source
pub async fn connect(url: &str) -> Result<(WsSink, WsSource), TransportError> {
    let (socket, response) = connect_async(url)
        .await
        .map_err(|e| TransportError::Io(e.to_string()))?;
    info!(url = url, status = %response.status(), "WebSocket connected");

    let (sink, source) = socket.split();
    Ok((WsSink { inner: sink }, WsSource { inner: source }))
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, request: &Request) -> Result<(), TransportError> {
        let text = serde_json::to_string(request).map_err(|e| TransportError::Encode(e.to_string()))?;
        self.inner
            .send(Message::text(text))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }
}

#[async_trait]
impl FrameSource for WsSource {
    async fn recv(&mut self) -> Result<Response, TransportError> {
        loop {
            let message = match self.inner.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => return Err(TransportError::Io(e.to_string())),
                None => return Err(TransportError::Closed),
            };

            return match message {
                Message::Text(text) => {
                    serde_json::from_str(text.as_str()).map_err(|e| TransportError::Decode(e.to_string()))
                }
                Message::Binary(bytes) => {
                    serde_json::from_slice(&bytes).map_err(|e| TransportError::Decode(e.to_string()))
                }
                Message::Close(frame) => {
                    debug!(?frame, "WebSocket close frame received");
                    Err(TransportError::Closed)
                }
                // Ping/pong are answered by tungstenite itself
                _ => continue,
            };
        }
    }
}
