//! Protocol Module
//!
//! Wire shapes exchanged with the remote: requests going out, responses and
//! notification batches coming back. Payloads are kept opaque
//! (`serde_json::Value`); their domain meaning belongs to the caller.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;

use crate::signing::SignError;

/// Name of a notification topic, e.g. `book.BTC-PERP`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Topic {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Topic {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for Topic {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Argument value kinds the remote accepts (and the signer can canonicalize)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<String>),
}

impl ArgValue {
    /// Convert an arbitrary JSON value, rejecting kinds that cannot be signed.
    pub fn from_json(key: &str, value: Value) -> Result<Self, SignError> {
        let unsupported = |kind: &'static str| SignError::UnsupportedArgument {
            key: key.to_string(),
            kind,
        };

        match value {
            Value::Bool(b) => Ok(ArgValue::Bool(b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(ArgValue::Int(i))
                } else if n.is_u64() {
                    Err(unsupported("unsigned integer above i64::MAX"))
                } else {
                    n.as_f64().map(ArgValue::Float).ok_or_else(|| unsupported("number"))
                }
            }
            Value::String(s) => Ok(ArgValue::Str(s)),
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s),
                    _ => Err(unsupported("list containing non-string values")),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(ArgValue::List),
            Value::Null => Err(unsupported("null")),
            Value::Object(_) => Err(unsupported("object")),
        }
    }
}

impl From<bool> for ArgValue {
    fn from(v: bool) -> Self {
        ArgValue::Bool(v)
    }
}

impl From<i64> for ArgValue {
    fn from(v: i64) -> Self {
        ArgValue::Int(v)
    }
}

impl From<i32> for ArgValue {
    fn from(v: i32) -> Self {
        ArgValue::Int(v.into())
    }
}

impl From<u32> for ArgValue {
    fn from(v: u32) -> Self {
        ArgValue::Int(v.into())
    }
}

impl From<f64> for ArgValue {
    fn from(v: f64) -> Self {
        ArgValue::Float(v)
    }
}

impl From<&str> for ArgValue {
    fn from(v: &str) -> Self {
        ArgValue::Str(v.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(v: String) -> Self {
        ArgValue::Str(v)
    }
}

impl From<Vec<String>> for ArgValue {
    fn from(v: Vec<String>) -> Self {
        ArgValue::List(v)
    }
}

impl From<Vec<&str>> for ArgValue {
    fn from(v: Vec<&str>) -> Self {
        ArgValue::List(v.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<Topic>> for ArgValue {
    fn from(v: Vec<Topic>) -> Self {
        ArgValue::List(v.into_iter().map(|t| t.0).collect())
    }
}

/// Outbound RPC request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub action: String,
    /// Assigned by the call registry at submission time
    #[serde(default)]
    pub id: u64,
    /// Kept sorted by key, which is the order the signer canonicalizes in
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub arguments: BTreeMap<String, ArgValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig: Option<String>,
}

impl Request {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            id: 0,
            arguments: BTreeMap::new(),
            sig: None,
        }
    }

    /// Add a named argument
    pub fn arg(mut self, key: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    /// Add every entry of a JSON object as an argument
    pub fn with_json_arguments(mut self, arguments: Map<String, Value>) -> Result<Self, SignError> {
        for (key, value) in arguments {
            let value = ArgValue::from_json(&key, value)?;
            self.arguments.insert(key, value);
        }
        Ok(self)
    }
}

/// Inbound frame: either an addressed response or a batch of notifications
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub success: bool,
    /// Remote error code, 0 on success
    #[serde(default, deserialize_with = "null_as_default")]
    pub error: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub testnet: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub us_in: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub us_out: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub us_diff: u64,
    #[serde(default)]
    pub result: Value,
    #[serde(default, deserialize_with = "null_as_default")]
    pub api_build: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifications: Option<Vec<Notification>>,
}

impl Response {
    /// Successful response addressed to `id`
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            id: Some(id),
            success: true,
            result,
            ..Default::default()
        }
    }

    /// Failed response addressed to `id`
    pub fn failed(id: u64, code: i64, message: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            success: false,
            error: code,
            message: message.into(),
            ..Default::default()
        }
    }

    /// Unaddressed notification batch
    pub fn notifications(batch: Vec<Notification>) -> Self {
        Self {
            notifications: Some(batch),
            ..Default::default()
        }
    }

    /// Decode the opaque result payload into a caller type
    pub fn result_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.result)
    }

    /// Split a frame by shape. A notifications list wins over an ID; a frame
    /// with neither yields `None`.
    pub fn classify(self) -> Option<Inbound> {
        if let Some(batch) = self.notifications {
            return Some(Inbound::Notifications(batch));
        }
        let id = self.id?;
        Some(Inbound::Reply { id, response: self })
    }
}

/// Topic-addressed push message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "message")]
    pub topic: Topic,
    #[serde(default)]
    pub result: Value,
}

impl Notification {
    pub fn new(topic: impl Into<Topic>, result: Value) -> Self {
        Self {
            topic: topic.into(),
            result,
        }
    }
}

/// Classified inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Notifications(Vec<Notification>),
    Reply { id: u64, response: Response },
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
