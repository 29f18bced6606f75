//! Signing Module
//!
//! Derives the authentication signature private actions must carry.
//!
//! The signed string is
//! `_=<nonce>&_ackey=<key>&_acsec=<secret>&_action=<action>` followed by
//! `&<key>=<value>` for every argument in ascending key order. It is hashed
//! with SHA-256 and the final signature is `<key>.<nonce>.<base64 digest>`.

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::protocol::{ArgValue, Request};

/// Signing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignError {
    #[error("cannot sign argument `{key}`: unsupported {kind} value")]
    UnsupportedArgument { key: String, kind: &'static str },
}

/// How integer arguments are written into the signed string.
///
/// `Decimal` writes `10` as `"10"`. `CodePoint` writes the character whose
/// Unicode scalar value is the integer (`65` becomes `"A"`), which is what the
/// legacy client produced; out of range values become U+FFFD.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegerEncoding {
    #[default]
    Decimal,
    CodePoint,
}

/// API key pair
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub key: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            secret: secret.into(),
        }
    }

    /// Read `DERIBIT_API_KEY` and `DERIBIT_API_SECRET`
    pub fn from_env() -> Option<Self> {
        let key = std::env::var("DERIBIT_API_KEY").ok()?;
        let secret = std::env::var("DERIBIT_API_SECRET").ok()?;
        Some(Self::new(key, secret))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Millisecond timestamp used as the signature nonce
pub fn current_nonce() -> i64 {
    Utc::now().timestamp_millis()
}

/// Request signer bound to one key pair
#[derive(Debug, Clone)]
pub struct Signer {
    credentials: Credentials,
    integers: IntegerEncoding,
}

impl Signer {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            integers: IntegerEncoding::default(),
        }
    }

    pub fn with_integer_encoding(mut self, integers: IntegerEncoding) -> Self {
        self.integers = integers;
        self
    }

    pub fn key(&self) -> &str {
        &self.credentials.key
    }

    /// Sign `request` in place using the current time as nonce
    pub fn sign(&self, request: &mut Request) {
        self.sign_with_nonce(request, current_nonce());
    }

    /// Sign `request` in place with a pinned nonce
    pub fn sign_with_nonce(&self, request: &mut Request, nonce: i64) {
        let sig = self.signature(&request.action, &request.arguments, nonce);
        request.sig = Some(sig);
    }

    /// Signature over typed arguments
    pub fn signature(&self, action: &str, arguments: &BTreeMap<String, ArgValue>, nonce: i64) -> String {
        let canonical = self.canonical_string(action, arguments, nonce);
        let digest = STANDARD.encode(Sha256::digest(canonical.as_bytes()));
        format!("{}.{}.{}", self.credentials.key, nonce, digest)
    }

    /// Signature over untyped JSON arguments; fails on kinds that cannot be
    /// canonicalized.
    pub fn signature_for_json(
        &self,
        action: &str,
        arguments: &Map<String, Value>,
        nonce: i64,
    ) -> Result<String, SignError> {
        let typed = arguments
            .iter()
            .map(|(key, value)| -> Result<(String, ArgValue), SignError> {
                Ok((key.clone(), ArgValue::from_json(key, value.clone())?))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(self.signature(action, &typed, nonce))
    }

    /// The pre-hash string. `BTreeMap` iteration gives ascending key order
    /// regardless of insertion order.
    pub fn canonical_string(&self, action: &str, arguments: &BTreeMap<String, ArgValue>, nonce: i64) -> String {
        let mut canonical = format!(
            "_={}&_ackey={}&_acsec={}&_action={}",
            nonce, self.credentials.key, self.credentials.secret, action
        );
        for (key, value) in arguments {
            canonical.push('&');
            canonical.push_str(key);
            canonical.push('=');
            canonical.push_str(&self.stringify(value));
        }
        canonical
    }

    fn stringify(&self, value: &ArgValue) -> String {
        match value {
            ArgValue::Bool(b) => b.to_string(),
            ArgValue::Int(i) => match self.integers {
                IntegerEncoding::Decimal => i.to_string(),
                IntegerEncoding::CodePoint => u32::try_from(*i)
                    .ok()
                    .and_then(char::from_u32)
                    .unwrap_or(char::REPLACEMENT_CHARACTER)
                    .to_string(),
            },
            ArgValue::Float(f) => format!("{:.6}", f),
            ArgValue::Str(s) => s.clone(),
            ArgValue::List(items) => items.concat(),
        }
    }
}
