//! Transport Module
//!
//! The duplex message channel the client runs over. The write half is shared
//! by every caller (behind the connection lock); the read half is owned by the
//! dispatcher alone.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::protocol::{Request, Response};

/// Transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,
    #[error("failed to encode frame: {0}")]
    Encode(String),
    #[error("failed to decode frame: {0}")]
    Decode(String),
    #[error("I/O error: {0}")]
    Io(String),
}

/// Outbound half of the connection
#[async_trait]
pub trait FrameSink: Send + 'static {
    async fn send(&mut self, request: &Request) -> Result<(), TransportError>;
}

/// Inbound half of the connection
#[async_trait]
pub trait FrameSource: Send + 'static {
    /// Block until the next frame arrives. `Decode` covers a single bad frame
    /// and leaves the source readable; any other error ends the connection.
    async fn recv(&mut self) -> Result<Response, TransportError>;
}
