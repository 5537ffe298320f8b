//! # mchat
//!
//! `mchat` is an RPC-over-MQTT messaging core: a client SDK that turns
//! request/response calls into per-call broker topics, and a gateway that
//! answers them.
//!
//! ## Core Modules
//!
//! - `protocol`: topic scheme, JSON envelopes and their codec.
//! - `transport`: the broker link abstraction with an MQTT (`rumqttc`) and
//!   an in-process implementation.
//! - `broker`: the in-process broker engine behind the local transport.
//! - `connection`: one shared connection with single-flight connect,
//!   reconnect backoff and inbound routing.
//! - `client`: correlation table, RPC client and the per-role multiplexer.
//! - `server`: the gateway loop, dispatcher and business handlers.
//! - `persistence`: sled-backed session bindings and the directory.
//! - `config`: settings loaded from file and environment.
//! - `utils`: error types and logging.

pub mod broker;
pub mod client;
pub mod config;
pub mod connection;
pub mod persistence;
pub mod protocol;
pub mod server;
pub mod transport;
pub mod utils;

#[cfg(test)]
mod tests;
