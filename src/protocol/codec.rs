//! JSON wire codec
//!
//! Requests are one flat JSON object: `{"action": ..., ...params}`.
//! Responses are `{"code", "message", "data"?}`. Every payload passes
//! through [`sanitize`] before publish and after receipt: NUL bytes are
//! stripped (some brokers truncate at `\0`) and surrounding whitespace is
//! trimmed. A payload that is empty after sanitizing is never sent.

use serde_json::{Map, Value};

use crate::protocol::envelope::{RequestEnvelope, ResponseEnvelope};
use crate::utils::error::CodecError;

/// Field carrying the correlation id inside per-role frames.
pub const SEQ_FIELD: &str = "seq_id";

/// Strip NUL characters and trim surrounding whitespace.
pub fn sanitize(raw: &str) -> String {
    raw.replace('\0', "").trim().to_string()
}

/// Byte-level [`sanitize`] for inbound payloads that may not be valid UTF-8.
pub fn sanitize_bytes(raw: &[u8]) -> Vec<u8> {
    let stripped: Vec<u8> = raw.iter().copied().filter(|b| *b != 0).collect();
    let start = stripped
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(stripped.len());
    let end = stripped
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    stripped[start..end].to_vec()
}

/// Sanitize an outbound text payload. `None` means "drop, do not publish".
pub fn prepare_outbound(text: &str) -> Option<Vec<u8>> {
    let safe = sanitize(text);
    if safe.is_empty() {
        None
    } else {
        Some(safe.into_bytes())
    }
}

/// Merge `action` with caller parameters into one JSON object.
///
/// `action` always wins over a parameter of the same name.
pub fn encode_request(action: &str, params: &Map<String, Value>) -> Result<Vec<u8>, CodecError> {
    let mut body = params.clone();
    body.insert("action".to_string(), Value::String(action.to_string()));
    let text = serde_json::to_string(&Value::Object(body))?;
    prepare_outbound(&text).ok_or(CodecError::EmptyPayload)
}

/// Parse an inbound request payload.
pub fn decode_request(payload: &[u8]) -> Result<RequestEnvelope, CodecError> {
    let clean = sanitize_bytes(payload);
    if clean.is_empty() {
        return Err(CodecError::EmptyPayload);
    }
    let value: Value = serde_json::from_slice(&clean)?;
    let Value::Object(mut params) = value else {
        return Err(CodecError::NotAnObject);
    };
    let action = match params.remove("action") {
        Some(Value::String(action)) if !action.is_empty() => action,
        _ => return Err(CodecError::MissingAction),
    };
    Ok(RequestEnvelope { action, params })
}

pub fn encode_response(envelope: &ResponseEnvelope) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(envelope)?)
}

/// Parse a response payload into a typed envelope.
///
/// Fails on non-JSON bodies and on bodies without an integer `code`; any
/// JSON value is accepted for `data`.
pub fn decode_response(payload: &[u8]) -> Result<ResponseEnvelope, CodecError> {
    let clean = sanitize_bytes(payload);
    if clean.is_empty() {
        return Err(CodecError::EmptyPayload);
    }
    let value: Value = serde_json::from_slice(&clean)?;
    if !value.is_object() {
        return Err(CodecError::NotAnObject);
    }
    Ok(serde_json::from_value(value)?)
}

/// A frame received on a per-role topic.
#[derive(Debug, Clone, PartialEq)]
pub enum RoleFrame {
    /// Carries `seq_id`: the reply to an outstanding role request.
    Response {
        seq_id: String,
        envelope: ResponseEnvelope,
    },
    /// Anything else: an unsolicited role event.
    Event(Value),
}

/// Encode a request for a per-role topic, where correlation travels in the
/// frame instead of the topic.
pub fn encode_role_request(
    action: &str,
    seq_id: &str,
    params: &Map<String, Value>,
) -> Result<String, CodecError> {
    let mut body = params.clone();
    body.insert("action".to_string(), Value::String(action.to_string()));
    body.insert(SEQ_FIELD.to_string(), Value::String(seq_id.to_string()));
    Ok(serde_json::to_string(&Value::Object(body))?)
}

/// Encode a role response frame.
pub fn encode_role_response(seq_id: &str, envelope: &ResponseEnvelope) -> Result<String, CodecError> {
    let mut value = serde_json::to_value(envelope)?;
    if let Value::Object(map) = &mut value {
        map.insert(SEQ_FIELD.to_string(), Value::String(seq_id.to_string()));
    }
    Ok(serde_json::to_string(&value)?)
}

pub fn decode_role_frame(text: &str) -> Result<RoleFrame, CodecError> {
    let clean = sanitize(text);
    if clean.is_empty() {
        return Err(CodecError::EmptyPayload);
    }
    let mut value: Value = serde_json::from_str(&clean)?;
    let seq_id = match &mut value {
        Value::Object(map) if map.contains_key("code") => match map.remove(SEQ_FIELD) {
            Some(Value::String(seq_id)) => Some(seq_id),
            _ => None,
        },
        _ => None,
    };
    match seq_id {
        Some(seq_id) => Ok(RoleFrame::Response {
            seq_id,
            envelope: serde_json::from_value(value)?,
        }),
        None => Ok(RoleFrame::Event(value)),
    }
}
