//! The `transport` module is the boundary to the publish/subscribe broker.
//!
//! It defines the `Connector`/`Link` seam the connection manager drives,
//! the options and events crossing that seam, and two implementations:
//! an MQTT connector over `rumqttc` and an in-process connector over the
//! local broker engine.

pub mod local;
pub mod message;
pub mod mqtt;
pub mod traits;

pub use local::LocalConnector;
pub use message::{ConnectOptions, LastWill, LinkEvent, QoS};
pub use mqtt::MqttConnector;
pub use traits::{Connector, Link, LinkEvents};
