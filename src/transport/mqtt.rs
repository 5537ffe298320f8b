//! MQTT connector backed by `rumqttc`.
//!
//! `rumqttc` drives the network from its `EventLoop`; polling it after an
//! error would make the library reconnect on a fixed interval. The pump
//! below stops at the first error and reports `LinkEvent::Closed`, leaving
//! reconnection and backoff to the connection manager.

use std::sync::Arc;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, Transport,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::transport::message::{ConnectOptions, LinkEvent, QoS};
use crate::transport::traits::{Connector, Link, LinkEvents};
use crate::utils::error::TransportError;

/// Request queue depth between the async client and its event loop.
const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Default, Clone)]
pub struct MqttConnector;

impl MqttConnector {
    pub fn new() -> Self {
        Self
    }

    pub(crate) fn options(options: &ConnectOptions) -> MqttOptions {
        let mut mqtt = MqttOptions::new(&options.client_id, &options.host, options.port);
        mqtt.set_keep_alive(options.keep_alive);
        mqtt.set_clean_session(options.clean_session);
        mqtt.set_max_packet_size(options.max_packet_size, options.max_packet_size);

        if let Some(username) = options.username.as_deref().filter(|u| !u.is_empty()) {
            let password = options.password.clone().unwrap_or_default();
            mqtt.set_credentials(username, password);
        }
        if let Some(will) = &options.last_will {
            mqtt.set_last_will(rumqttc::LastWill::new(
                &will.topic,
                will.payload.clone(),
                rumqttc::QoS::AtLeastOnce,
                will.retain,
            ));
        }
        if options.use_tls {
            mqtt.set_transport(Transport::tls_with_default_config());
        }
        mqtt
    }
}

#[async_trait]
impl Connector for MqttConnector {
    async fn connect(
        &self,
        options: &ConnectOptions,
    ) -> Result<(Arc<dyn Link>, LinkEvents), TransportError> {
        let (client, mut eventloop) = AsyncClient::new(Self::options(options), CHANNEL_CAPACITY);

        let handshake = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        return if ack.code == ConnectReturnCode::Success {
                            Ok(())
                        } else {
                            Err(TransportError::Connect(format!(
                                "broker refused connection: {:?}",
                                ack.code
                            )))
                        };
                    }
                    Ok(_) => continue,
                    Err(e) => return Err(TransportError::Connect(e.to_string())),
                }
            }
        };

        match tokio::time::timeout(options.connect_timeout, handshake).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(TransportError::Connect(format!(
                    "handshake with {} timed out",
                    options.url()
                )));
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(pump(eventloop, tx));

        Ok((Arc::new(MqttLink { client }), rx))
    }
}

async fn pump(mut eventloop: EventLoop, tx: mpsc::UnboundedSender<LinkEvent>) {
    loop {
        let closed = match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let event = LinkEvent::Message {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                };
                if tx.send(event).is_err() {
                    debug!("link owner dropped, stopping event loop");
                    return;
                }
                None
            }
            Ok(Event::Incoming(Packet::Disconnect)) => Some("broker sent disconnect".to_string()),
            Ok(Event::Outgoing(Outgoing::Disconnect)) => Some("client disconnected".to_string()),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "mqtt event loop error");
                Some(e.to_string())
            }
        };

        if let Some(reason) = closed {
            let _ = tx.send(LinkEvent::Closed { reason });
            return;
        }
    }
}

struct MqttLink {
    client: AsyncClient,
}

fn qos(q: QoS) -> rumqttc::QoS {
    match q {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
    }
}

#[async_trait]
impl Link for MqttLink {
    async fn subscribe(&self, filter: &str, q: QoS) -> Result<(), TransportError> {
        self.client
            .subscribe(filter, qos(q))
            .await
            .map_err(|e| TransportError::Subscribe {
                filter: filter.to_string(),
                reason: e.to_string(),
            })
    }

    async fn unsubscribe(&self, filter: &str) -> Result<(), TransportError> {
        self.client
            .unsubscribe(filter)
            .await
            .map_err(|e| TransportError::Subscribe {
                filter: filter.to_string(),
                reason: e.to_string(),
            })
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        q: QoS,
        retain: bool,
    ) -> Result<(), TransportError> {
        self.client
            .publish(topic, qos(q), retain, payload)
            .await
            .map_err(|e| TransportError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.client
            .disconnect()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))
    }
}
