//! The `connection` module keeps one broker link alive per process.
//!
//! [`ConnectionManager`] wraps a [`crate::transport::Connector`] with
//! single-flight connect, subscription replay, loss detection and
//! exponential [`Backoff`] reconnects. State changes are published on a
//! `watch` channel as [`ConnectionState`].

pub mod backoff;
pub mod manager;
pub mod state;

pub use backoff::Backoff;
pub use manager::{ConnectionManager, DrainOnLoss, Inbound, InboundMessage, Publisher};
pub use state::ConnectionState;
