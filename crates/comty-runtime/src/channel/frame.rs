//! JSON frame envelope shared by both channel variants.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::Result;

/// Event name the server uses to report a channel-level failure.
pub const ERROR_EVENT: &str = "error";
/// Event carrying the credential on standard channels.
pub const AUTH_EVENT: &str = "auth";
/// Event asking a live channel to switch to a renewed credential.
pub const REAUTH_EVENT: &str = "auth:reauth";

/// One `{ "event", "data" }` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl ChannelFrame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    pub fn auth(token: &str) -> Self {
        Self::new(AUTH_EVENT, json!({ "token": token }))
    }

    pub fn reauth(token: &str) -> Self {
        Self::new(REAUTH_EVENT, Value::String(token.to_string()))
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn is_error(&self) -> bool {
        self.event == ERROR_EVENT
    }

    /// Human readable message of an error frame.
    pub fn error_message(&self) -> String {
        match &self.data {
            Value::String(s) => s.clone(),
            Value::Object(map) => map
                .get("message")
                .or_else(|| map.get("error"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| self.data.to_string()),
            Value::Null => "unknown channel error".to_string(),
            other => other.to_string(),
        }
    }
}
