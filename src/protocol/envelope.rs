//! Wire envelopes
//!
//! `ResponseEnvelope` is the single contract between the dispatcher and every
//! caller: `code == 0` is success, anything else is an application error
//! code, and `data` is only carried on success paths that produce a result.
//!
//! `data` is an `Option<Value>`: a missing field and an explicit `null`
//! both decode to `None`, and `None` is omitted on encode.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Response status codes.
pub mod code {
    pub const OK: i64 = 0;
    pub const BAD_REQUEST: i64 = 400;
    pub const UNAUTHORIZED: i64 = 401;
    pub const FORBIDDEN: i64 = 403;
    pub const NOT_FOUND: i64 = 404;
    pub const TOO_MANY_REQUESTS: i64 = 429;
    pub const SERVER_ERROR: i64 = 500;
    pub const GATEWAY_TIMEOUT: i64 = 504;
}

/// A decoded request: the action name plus every other top-level field.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    pub action: String,
    pub params: Map<String, Value>,
}

impl RequestEnvelope {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            params: Map::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// String parameter, or `None` when absent or not a string.
    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ResponseEnvelope {
    pub fn ok(data: Value) -> Self {
        Self {
            code: code::OK,
            message: "ok".to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn unauthorized() -> Self {
        Self::error(code::UNAUTHORIZED, "Unauthorized")
    }

    pub fn server_error() -> Self {
        Self::error(code::SERVER_ERROR, "Server error")
    }

    pub fn is_ok(&self) -> bool {
        self.code == code::OK
    }

    /// Result data for successful responses. Ignored when `code != 0`.
    pub fn result(&self) -> Option<&Value> {
        if self.is_ok() { self.data.as_ref() } else { None }
    }
}

/// Payload pushed to `<push>/inbox/<accountId>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboxMessage {
    pub msg_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub from_employee_id: String,
    pub content: Value,
    pub sent_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote_msg_id: Option<String>,
}

/// Payload pushed to `<push>/group/<groupId>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMessage {
    pub msg_id: String,
    pub group_id: String,
    pub from_employee_id: String,
    pub content: Value,
    pub sent_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote_msg_id: Option<String>,
}

/// Retained presence payload on `<push>/status/<accountId>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceStatus {
    pub status: String,
    pub updated_at: String,
}

impl PresenceStatus {
    pub fn online() -> Self {
        Self::now("online")
    }

    pub fn offline() -> Self {
        Self::now("offline")
    }

    fn now(status: &str) -> Self {
        Self {
            status: status.to_string(),
            updated_at: iso_now(),
        }
    }
}

/// Current time as an RFC 3339 UTC string with millisecond precision.
pub fn iso_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
