//! The `protocol` module holds everything that defines the wire contract
//! between clients and the gateway: topic strings, envelopes and the JSON
//! codec. Nothing here performs I/O.

pub mod codec;
pub mod envelope;
pub mod topic;

pub use envelope::{RequestEnvelope, ResponseEnvelope, code};
pub use topic::{ConnectionIdentity, RoleTopics, TopicScheme};

#[cfg(test)]
mod tests;
