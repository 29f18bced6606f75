//! Client error taxonomy.
//!
//! Every variant is `Clone`: when the dispatcher dies, one terminal error is
//! handed to every call still waiting.

use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigError;
use crate::protocol::Topic;
use crate::signing::SignError;
use crate::transport::TransportError;

/// RPC client errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RpcError {
    #[error("signing failed: {0}")]
    Signing(#[from] SignError),
    #[error("no credentials configured for private action `{0}`")]
    MissingCredentials(String),
    #[error("failed to connect: {0}")]
    Connect(TransportError),
    #[error("failed to write request: {0}")]
    TransportWrite(TransportError),
    #[error("error reading message: {0}")]
    TransportRead(TransportError),
    #[error("request {id} timed out after {timeout:?}")]
    Timeout { id: u64, timeout: Duration },
    #[error("request failed with: {message} (code {code})")]
    Server { code: i64, message: String },
    #[error("no pending request found for response ID {0}")]
    UnmatchedResponse(u64),
    #[error("no subscription found for {0}")]
    UnroutableNotification(Topic),
    #[error("frame carries neither an ID nor notifications")]
    MalformedFrame,
    #[error("connection closed")]
    Closed,
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl RpcError {
    /// Inbound frames the dispatcher could not route
    pub fn is_protocol_anomaly(&self) -> bool {
        matches!(
            self,
            RpcError::UnmatchedResponse(_) | RpcError::UnroutableNotification(_) | RpcError::MalformedFrame
        )
    }
}
