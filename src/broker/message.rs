//! Message definitions for the in-process broker
//!
//! `Message` is what the engine routes and records. Notes on fields:
//! - `topic`: concrete topic name (never a filter)
//! - `payload`: raw bytes as published
//! - `timestamp`: milliseconds since UNIX epoch; set by the broker on publish
//! - `message_id`: opaque unique id, generated by the broker
//! - `retain`: retained messages are replayed to later subscribers

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
    pub timestamp: i64,
    pub message_id: String,
    pub retain: bool,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>, retain: bool) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            timestamp: 0,
            message_id: String::new(),
            retain,
        }
    }

    pub fn payload_str(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}
