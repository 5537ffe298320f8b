//! In-process connector over the local [`Broker`] engine.
//!
//! Used by `mchat` when no external broker is configured and by tests. It
//! can be told to refuse the next N handshakes and to drop a live session,
//! which is how connection loss and backoff are exercised.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::broker::Broker;
use crate::broker::message::Message;
use crate::transport::message::{ConnectOptions, QoS};
use crate::transport::traits::{Connector, Link, LinkEvents};
use crate::utils::error::TransportError;

#[derive(Debug, Clone, Default)]
pub struct LocalConnector {
    broker: Arc<Mutex<Broker>>,
    refuse_next: Arc<AtomicUsize>,
    attempts: Arc<AtomicUsize>,
}

impl LocalConnector {
    pub fn new(broker: Arc<Mutex<Broker>>) -> Self {
        Self {
            broker,
            refuse_next: Arc::new(AtomicUsize::new(0)),
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn broker(&self) -> Arc<Mutex<Broker>> {
        self.broker.clone()
    }

    /// Refuse the next `n` handshakes.
    pub fn refuse_next(&self, n: usize) {
        self.refuse_next.store(n, Ordering::SeqCst);
    }

    /// Handshakes attempted so far, refused ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Simulate an abnormal connection loss for `client_id`.
    pub fn drop_session(&self, client_id: &str) -> bool {
        lock(&self.broker).drop_client(client_id, "connection reset")
    }
}

fn lock(broker: &Mutex<Broker>) -> MutexGuard<'_, Broker> {
    broker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Connector for LocalConnector {
    async fn connect(
        &self,
        options: &ConnectOptions,
    ) -> Result<(Arc<dyn Link>, LinkEvents), TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refuse_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Connect(format!(
                "{} refused connection",
                options.url()
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let epoch = lock(&self.broker).register_client(
            &options.client_id,
            tx,
            options.last_will.clone(),
        );

        let link = LocalLink {
            broker: self.broker.clone(),
            client_id: options.client_id.clone(),
            epoch,
        };
        Ok((Arc::new(link), rx))
    }
}

struct LocalLink {
    broker: Arc<Mutex<Broker>>,
    client_id: String,
    epoch: u64,
}

impl LocalLink {
    fn live(&self) -> Option<MutexGuard<'_, Broker>> {
        let broker = lock(&self.broker);
        broker.is_live(&self.client_id, self.epoch).then_some(broker)
    }
}

#[async_trait]
impl Link for LocalLink {
    async fn subscribe(&self, filter: &str, _qos: QoS) -> Result<(), TransportError> {
        let mut broker = self.live().ok_or_else(|| TransportError::Subscribe {
            filter: filter.to_string(),
            reason: "session closed".to_string(),
        })?;
        broker.subscribe(filter, &self.client_id);
        Ok(())
    }

    async fn unsubscribe(&self, filter: &str) -> Result<(), TransportError> {
        if let Some(mut broker) = self.live() {
            broker.unsubscribe(filter, &self.client_id);
        }
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        _qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError> {
        let mut broker = self.live().ok_or_else(|| TransportError::Publish {
            topic: topic.to_string(),
            reason: "session closed".to_string(),
        })?;
        broker.publish(Message::new(topic, payload, retain));
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if let Some(mut broker) = self.live() {
            broker.cleanup_client(&self.client_id);
        }
        Ok(())
    }
}
