//! In-process transport carrying JSON text frames over tokio channels.
//!
//! [`pair`] returns the client halves plus a [`RemotePeer`] that plays the
//! server: it reads the requests the client wrote and pushes responses or
//! notification batches back.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{FrameSink, FrameSource, TransportError};
use crate::protocol::{Notification, Request, Response};

/// Client write half
pub struct MemorySink {
    tx: mpsc::Sender<String>,
}

/// Client read half
pub struct MemorySource {
    rx: mpsc::Receiver<String>,
}

/// Server side of an in-memory connection
pub struct RemotePeer {
    requests: mpsc::Receiver<String>,
    frames: mpsc::Sender<String>,
}

/// Create a connected sink/source pair and the peer on the other end
pub fn pair(buffer: usize) -> (MemorySink, MemorySource, RemotePeer) {
    let (request_tx, request_rx) = mpsc::channel(buffer);
    let (frame_tx, frame_rx) = mpsc::channel(buffer);
    (
        MemorySink { tx: request_tx },
        MemorySource { rx: frame_rx },
        RemotePeer {
            requests: request_rx,
            frames: frame_tx,
        },
    )
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, request: &Request) -> Result<(), TransportError> {
        let frame = serde_json::to_string(request).map_err(|e| TransportError::Encode(e.to_string()))?;
        self.tx.send(frame).await.map_err(|_| TransportError::Closed)
    }
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn recv(&mut self) -> Result<Response, TransportError> {
        let frame = self.rx.recv().await.ok_or(TransportError::Closed)?;
        serde_json::from_str(&frame).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

impl RemotePeer {
    /// Next request written by the client, `None` once the client is gone
    pub async fn next_request(&mut self) -> Option<Request> {
        let frame = self.requests.recv().await?;
        serde_json::from_str(&frame).ok()
    }

    /// Reply to a request
    pub async fn reply(&self, response: &Response) -> Result<(), TransportError> {
        let frame = serde_json::to_string(response).map_err(|e| TransportError::Encode(e.to_string()))?;
        self.send_raw(frame).await
    }

    /// Push a notification batch
    pub async fn notify(&self, batch: Vec<Notification>) -> Result<(), TransportError> {
        self.reply(&Response::notifications(batch)).await
    }

    /// Push an arbitrary text frame
    pub async fn send_raw(&self, frame: impl Into<String>) -> Result<(), TransportError> {
        self.frames.send(frame.into()).await.map_err(|_| TransportError::Closed)
    }

    /// Stop accepting requests; further client writes fail with `Closed`
    pub fn stop_reading(&mut self) {
        self.requests.close();
    }
}
