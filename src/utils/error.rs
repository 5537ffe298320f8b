//! The `error` module defines the error types used across `mchat`.
//!
//! The taxonomy follows the layers of the transport:
//!
//! - [`TransportError`]: broker connection, subscribe and publish failures.
//!   These drive reconnection and surface as connection state, never as a
//!   per-call failure on their own.
//! - [`RpcError`]: the failure of one outstanding call (timeout, malformed
//!   response, disconnect while pending, remote error code).
//! - [`CodecError`]: envelope encoding/decoding problems.
//! - [`HandlerError`]: protocol and business errors raised by server
//!   handlers; always converted into a response envelope by the dispatcher.
//! - [`StoreError`]: session/directory storage failures.
//! - [`SettingsError`]: configuration problems detected at startup.

use thiserror::Error;

use crate::protocol::envelope::{ResponseEnvelope, code};

/// Errors raised by the broker connection layer.
///
/// `Clone` so that a single in-flight connect attempt can hand the same
/// result to every caller awaiting it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("subscribe to '{filter}' failed: {reason}")]
    Subscribe { filter: String, reason: String },

    #[error("publish to '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("not connected")]
    NotConnected,

    #[error("disconnected")]
    Disconnected,
}

/// Errors encoding or decoding wire envelopes.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("missing action")]
    MissingAction,

    #[error("payload empty after sanitize")]
    EmptyPayload,
}

/// The failure of a single request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RpcError {
    #[error("request {seq_id} timed out after {timeout_ms} ms")]
    Timeout { seq_id: String, timeout_ms: u64 },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("disconnected")]
    Disconnected,

    #[error("sequence id {0} already outstanding")]
    DuplicateSequence(String),

    #[error("remote error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("payload empty after sanitize")]
    EmptyPayload,

    #[error("failed to encode request: {0}")]
    Encode(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl From<CodecError> for RpcError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::EmptyPayload => RpcError::EmptyPayload,
            other => RpcError::Encode(other.to_string()),
        }
    }
}

impl RpcError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcError::Timeout { .. })
    }
}

/// Errors from session and directory storage.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors a handler may return. The dispatcher turns every variant into a
/// response envelope; only `Internal` hides its detail from the caller.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl HandlerError {
    pub fn into_envelope(self) -> ResponseEnvelope {
        match self {
            HandlerError::BadRequest(msg) => ResponseEnvelope::error(code::BAD_REQUEST, msg),
            HandlerError::NotFound(msg) => ResponseEnvelope::error(code::NOT_FOUND, msg),
            HandlerError::Forbidden(msg) => ResponseEnvelope::error(code::FORBIDDEN, msg),
            HandlerError::Internal(_) => ResponseEnvelope::server_error(),
        }
    }
}

impl From<StoreError> for HandlerError {
    fn from(e: StoreError) -> Self {
        HandlerError::Internal(e.to_string())
    }
}

impl From<TransportError> for HandlerError {
    fn from(e: TransportError) -> Self {
        HandlerError::Internal(e.to_string())
    }
}

/// Configuration errors. Fatal at startup.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error("missing or invalid setting '{0}'")]
    Invalid(&'static str),
}
