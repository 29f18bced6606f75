//! Client configuration with validation.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::signing::{Credentials, IntegerEncoding};

/// Default endpoint of the v1 WebSocket API
pub const DEFAULT_URL: &str = "wss://www.deribit.com/ws/api/v1/";

/// Default time a caller waits for its response
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("call_timeout cannot be 0")]
    ZeroTimeout,
    #[error("subscription_buffer cannot be 0")]
    ZeroBuffer,
    #[error("url must use ws:// or wss://, got {0}")]
    InvalidUrl(String),
    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

/// What the dispatcher does with a frame it cannot route
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyPolicy {
    /// Log and report the anomaly, keep serving other calls
    #[default]
    Report,
    /// Stop the dispatcher and fail every pending call
    FailFast,
}

/// RPC client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket endpoint used by `RpcClient::connect`
    pub url: String,
    /// How long a caller waits for its response
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,
    /// Buffer size of channels created by `RpcClient::subscribe`
    pub subscription_buffer: usize,
    pub anomaly_policy: AnomalyPolicy,
    pub integer_encoding: IntegerEncoding,
    /// Required for private actions
    pub credentials: Option<Credentials>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            subscription_buffer: 1024,
            anomaly_policy: AnomalyPolicy::default(),
            integer_encoding: IntegerEncoding::default(),
            credentials: None,
        }
    }
}

impl ClientConfig {
    /// Parse from JSON; missing fields take their defaults
    pub fn from_json(input: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.call_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.subscription_buffer == 0 {
            return Err(ConfigError::ZeroBuffer);
        }
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(ConfigError::InvalidUrl(self.url.clone()));
        }
        Ok(())
    }
}
