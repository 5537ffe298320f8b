//! The `broker` module is an in-process stand-in for the MQTT broker.
//!
//! The production transport talks to an external broker through `rumqttc`;
//! this engine gives the local connector (and every transport-level test)
//! the same routing semantics without a network.

pub mod engine;
pub mod message;
pub mod topic;

pub use engine::Broker;

#[cfg(test)]
mod tests;
