//! Types exchanged between the connection manager and a broker link.

use std::time::Duration;

/// Delivery guarantee requested from the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QoS {
    AtMostOnce,
    #[default]
    AtLeastOnce,
}

/// Message the broker publishes on the client's behalf if the connection
/// drops without a clean disconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

/// 16 MiB. Requests carry arbitrary JSON and `org.tree` replies grow with
/// the directory.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;

/// Everything needed to open one physical broker connection.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    /// Broker-level connection id. Not the topic identity.
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub clean_session: bool,
    pub connect_timeout: Duration,
    /// Largest MQTT packet accepted or sent, in bytes.
    pub max_packet_size: usize,
    pub last_will: Option<LastWill>,
}

impl ConnectOptions {
    pub fn new(host: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            use_tls: false,
            client_id: client_id.into(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(60),
            clean_session: true,
            connect_timeout: Duration::from_secs(15),
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            last_will: None,
        }
    }

    pub fn url(&self) -> String {
        let scheme = if self.use_tls { "mqtts" } else { "mqtt" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

/// Events a live link reports back to its owner, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Message { topic: String, payload: Vec<u8> },
    /// The physical connection is gone. No further events follow.
    Closed { reason: String },
}
