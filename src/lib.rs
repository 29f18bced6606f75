//! Deribit RPC Core
//!
//! Client-side correlation layer for the exchange's WebSocket RPC protocol.
//! Many concurrent calls share one duplex connection with unsolicited
//! notifications; each caller gets exactly the response carrying its own
//! correlation ID, and notifications are fanned out per topic.
//!
//! ```ignore
//! use deribit_rpc::{ClientConfig, Credentials, Request, RpcClient};
//!
//! let config = ClientConfig::default().with_credentials(Credentials::new(key, secret));
//! let client = RpcClient::connect(config).await?;
//! let mut book = client.subscribe("book.BTC-PERPETUAL").await;
//! let account = client.call_private(Request::new("account")).await?;
//! ```

pub mod call;
pub mod client;
pub mod config;
mod dispatcher;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod signing;
pub mod subscription;
pub mod transport;
pub mod websocket;

pub use client::{ClientStats, PendingResponse, RpcClient};
pub use config::{AnomalyPolicy, ClientConfig, ConfigError};
pub use error::RpcError;
pub use protocol::{ArgValue, Inbound, Notification, Request, Response, Topic};
pub use signing::{Credentials, IntegerEncoding, SignError, Signer};
pub use subscription::Destination;
pub use transport::{FrameSink, FrameSource, TransportError};

use tracing_subscriber::EnvFilter;

/// Install a `tracing` fmt subscriber filtered by `RUST_LOG` (default `info`).
/// Safe to call more than once.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
