//! The seam between `mchat` and a broker client library.
//!
//! A [`Connector`] performs the handshake and returns a [`Link`] plus the
//! receiving end of its event stream. The connection manager owns
//! reconnection; links never reconnect on their own.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::transport::message::{ConnectOptions, LinkEvent, QoS};
use crate::utils::error::TransportError;

pub type LinkEvents = mpsc::UnboundedReceiver<LinkEvent>;

#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection and complete the broker handshake.
    async fn connect(
        &self,
        options: &ConnectOptions,
    ) -> Result<(Arc<dyn Link>, LinkEvents), TransportError>;
}

/// One live physical connection.
#[async_trait]
pub trait Link: Send + Sync {
    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), TransportError>;

    async fn unsubscribe(&self, filter: &str) -> Result<(), TransportError>;

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError>;

    /// Clean disconnect. The last will is not published.
    async fn disconnect(&self) -> Result<(), TransportError>;
}
