//! Connection manager
//!
//! Owns the single broker link for a process and keeps it alive:
//! - `connect()` is single-flight; concurrent callers await the same attempt
//! - the subscription set is remembered and re-established on every connect
//! - an abnormal loss drains every attached pending-call table with
//!   `Disconnected` and schedules a reconnect with exponential backoff
//! - `disconnect()` is terminal until the next explicit `connect()`
//!
//! Inbound messages reach the application through explicit routes: each
//! [`ConnectionManager::route`] call returns an [`Inbound`] receiver for a
//! topic prefix. Messages on one topic reach a route in arrival order.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::connection::backoff::Backoff;
use crate::connection::state::ConnectionState;
use crate::transport::{ConnectOptions, Connector, Link, LinkEvent, LinkEvents, QoS};
use crate::utils::error::{RpcError, TransportError};

/// Anything holding pending calls that must fail when the link drops.
pub trait DrainOnLoss: Send + Sync {
    /// Fail every pending entry with `error`; returns how many were failed.
    fn drain_all(&self, error: RpcError) -> usize;
}

/// Publish access for components that do not own the connection.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool)
    -> Result<(), TransportError>;
}

/// A message delivered to a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

struct Route {
    id: u64,
    prefix: String,
    tx: mpsc::UnboundedSender<InboundMessage>,
}

type Routes = Arc<Mutex<Vec<Route>>>;
type Attempt = Shared<BoxFuture<'static, Result<(), TransportError>>>;

enum HandshakeError {
    /// The attempt failed; the caller decides whether to retry.
    Failed(TransportError),
    /// The new link was lost before the handshake finished and the loss
    /// handler has taken over.
    Lost(TransportError),
}

/// Receiving end of a route. Dropping it removes the route.
pub struct Inbound {
    id: u64,
    rx: mpsc::UnboundedReceiver<InboundMessage>,
    routes: Weak<Mutex<Vec<Route>>>,
}

impl Inbound {
    pub async fn recv(&mut self) -> Option<InboundMessage> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<InboundMessage> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Inbound {
    fn drop(&mut self) {
        if let Some(routes) = self.routes.upgrade() {
            lock(&routes).retain(|r| r.id != self.id);
        }
    }
}

struct Inner {
    connector: Arc<dyn Connector>,
    options: ConnectOptions,
    qos: QoS,
    state: watch::Sender<ConnectionState>,
    link: Mutex<Option<Arc<dyn Link>>>,
    /// Bumped for every established link; a loss reported by an older
    /// link's event pump is ignored.
    generation: AtomicU64,
    in_flight: Mutex<Option<Attempt>>,
    filters: Mutex<Vec<String>>,
    routes: Routes,
    next_route: AtomicU64,
    tables: Mutex<Vec<Weak<dyn DrainOnLoss>>>,
    backoff: Mutex<Backoff>,
    user_closed: AtomicBool,
    reconnect: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("client_id", &self.inner.options.client_id)
            .field("state", &*self.inner.state.borrow())
            .finish()
    }
}

fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, options: ConnectOptions, backoff: Backoff) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                connector,
                options,
                qos: QoS::AtLeastOnce,
                state,
                link: Mutex::new(None),
                generation: AtomicU64::new(0),
                in_flight: Mutex::new(None),
                filters: Mutex::new(Vec::new()),
                routes: Arc::new(Mutex::new(Vec::new())),
                next_route: AtomicU64::new(1),
                tables: Mutex::new(Vec::new()),
                backoff: Mutex::new(backoff),
                user_closed: AtomicBool::new(false),
                reconnect: Mutex::new(None),
            }),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.inner.options.client_id
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.inner.options
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Snapshot of the reconnect backoff.
    pub fn backoff(&self) -> Backoff {
        lock(&self.inner.backoff).clone()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.borrow().is_connected()
    }

    /// Connect, or join the attempt already in flight.
    pub async fn connect(&self) -> Result<(), TransportError> {
        self.inner.user_closed.store(false, Ordering::SeqCst);
        self.ensure_connected().await
    }

    async fn ensure_connected(&self) -> Result<(), TransportError> {
        let attempt = {
            let mut in_flight = lock(&self.inner.in_flight);
            if self.is_connected() {
                return Ok(());
            }
            match in_flight.as_ref() {
                Some(attempt) => attempt.clone(),
                None => {
                    let this = self.clone();
                    let attempt = async move { this.establish().await }.boxed().shared();
                    *in_flight = Some(attempt.clone());
                    attempt
                }
            }
        };
        attempt.await
    }

    async fn establish(self) -> Result<(), TransportError> {
        let result = self.handshake().await;
        lock(&self.inner.in_flight).take();
        match result {
            Ok(()) => Ok(()),
            // handle_loss has already drained and scheduled the retry
            Err(HandshakeError::Lost(e)) => {
                debug!(client_id = %self.client_id(), error = %e, "link lost during handshake");
                Err(e)
            }
            Err(HandshakeError::Failed(e)) => {
                if self.inner.user_closed.load(Ordering::SeqCst) {
                    self.set_state(ConnectionState::Disconnected);
                } else {
                    warn!(client_id = %self.client_id(), error = %e, "connect attempt failed");
                    self.set_state(ConnectionState::Error(e.to_string()));
                    self.schedule_reconnect();
                }
                Err(e)
            }
        }
    }

    async fn handshake(&self) -> Result<(), HandshakeError> {
        self.set_state(ConnectionState::Connecting);
        debug!(client_id = %self.client_id(), url = %self.inner.options.url(), "connecting");

        let (link, events) = self
            .inner
            .connector
            .connect(&self.inner.options)
            .await
            .map_err(HandshakeError::Failed)?;
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *lock(&self.inner.link) = Some(link.clone());
        tokio::spawn(self.clone().pump(generation, events));

        for filter in self.filters() {
            if let Err(e) = link.subscribe(&filter, self.inner.qos).await {
                warn!(client_id = %self.client_id(), %filter, error = %e, "subscribe failed");
            }
        }

        if self.inner.user_closed.load(Ordering::SeqCst) {
            lock(&self.inner.link).take();
            let _ = link.disconnect().await;
            return Err(HandshakeError::Failed(TransportError::Disconnected));
        }
        let current = lock(&self.inner.link)
            .as_ref()
            .is_some_and(|l| Arc::ptr_eq(l, &link));
        if !current {
            return Err(HandshakeError::Lost(TransportError::Connect(
                "link closed during handshake".to_string(),
            )));
        }

        lock(&self.inner.backoff).reset();
        self.set_state(ConnectionState::Connected);
        info!(client_id = %self.client_id(), "connected to broker");
        Ok(())
    }

    async fn pump(self, generation: u64, mut events: LinkEvents) {
        while let Some(event) = events.recv().await {
            match event {
                LinkEvent::Message { topic, payload } => self.dispatch(topic, payload),
                LinkEvent::Closed { reason } => {
                    self.handle_loss(generation, &reason);
                    return;
                }
            }
        }
        self.handle_loss(generation, "event stream ended");
    }

    fn dispatch(&self, topic: String, payload: Vec<u8>) {
        let mut routes = lock(&self.inner.routes);
        let mut delivered = false;
        routes.retain(|route| {
            if !topic.starts_with(&route.prefix) {
                return true;
            }
            delivered = true;
            route
                .tx
                .send(InboundMessage {
                    topic: topic.clone(),
                    payload: payload.clone(),
                })
                .is_ok()
        });
        if !delivered {
            debug!(%topic, "no route for inbound message");
        }
    }

    fn handle_loss(&self, generation: u64, reason: &str) {
        if self.inner.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        if lock(&self.inner.link).take().is_none() {
            return;
        }
        warn!(client_id = %self.client_id(), %reason, "connection lost");
        let failed = self.drain(RpcError::Disconnected);
        if failed > 0 {
            debug!(failed, "failed pending calls after connection loss");
        }
        self.set_state(ConnectionState::Disconnected);
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&self) {
        if self.inner.user_closed.load(Ordering::SeqCst) {
            return;
        }
        let delay = lock(&self.inner.backoff).next_delay();
        debug!(client_id = %self.client_id(), delay_ms = delay.as_millis() as u64, "reconnect scheduled");

        let this = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if this.inner.user_closed.load(Ordering::SeqCst) || this.is_connected() {
                return;
            }
            info!(client_id = %this.client_id(), "reconnecting");
            // a failure schedules the next attempt itself
            let _ = this.ensure_connected().await;
        });
        if let Some(previous) = lock(&self.inner.reconnect).replace(handle) {
            previous.abort();
        }
    }

    /// Close the link and stop reconnecting. Pending calls fail with
    /// `Disconnected` before this returns.
    pub async fn disconnect(&self) {
        self.inner.user_closed.store(true, Ordering::SeqCst);
        if let Some(handle) = lock(&self.inner.reconnect).take() {
            handle.abort();
        }
        let link = lock(&self.inner.link).take();
        self.drain(RpcError::Disconnected);
        self.set_state(ConnectionState::Disconnected);
        lock(&self.inner.backoff).reset();

        if let Some(link) = link {
            if let Err(e) = link.disconnect().await {
                debug!(error = %e, "error closing link");
            }
            info!(client_id = %self.client_id(), "disconnected from broker");
        }
    }

    pub async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> Result<(), TransportError> {
        let link = self.current_link().ok_or(TransportError::NotConnected)?;
        link.publish(topic, payload, self.inner.qos, retain).await
    }

    /// Add `filter` to the remembered set and subscribe now if connected.
    pub async fn subscribe(&self, filter: &str) -> Result<(), TransportError> {
        {
            let mut filters = lock(&self.inner.filters);
            if !filters.iter().any(|f| f == filter) {
                filters.push(filter.to_string());
            }
        }
        match self.current_link() {
            Some(link) => link.subscribe(filter, self.inner.qos).await,
            None => Ok(()),
        }
    }

    pub async fn unsubscribe(&self, filter: &str) -> Result<(), TransportError> {
        lock(&self.inner.filters).retain(|f| f != filter);
        match self.current_link() {
            Some(link) => link.unsubscribe(filter).await,
            None => Ok(()),
        }
    }

    /// Remembered filters, in the order they were added.
    pub fn filters(&self) -> Vec<String> {
        lock(&self.inner.filters).clone()
    }

    /// Deliver every inbound message whose topic starts with `prefix`.
    pub fn route(&self, prefix: impl Into<String>) -> Inbound {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_route.fetch_add(1, Ordering::SeqCst);
        lock(&self.inner.routes).push(Route {
            id,
            prefix: prefix.into(),
            tx,
        });
        Inbound {
            id,
            rx,
            routes: Arc::downgrade(&self.inner.routes),
        }
    }

    /// Register a table to be drained on connection loss or disconnect.
    pub fn attach<T: DrainOnLoss + 'static>(&self, table: &Arc<T>) {
        let weak: Weak<dyn DrainOnLoss> = Arc::downgrade(table) as Weak<dyn DrainOnLoss>;
        lock(&self.inner.tables).push(weak);
    }

    fn drain(&self, error: RpcError) -> usize {
        let tables: Vec<Arc<dyn DrainOnLoss>> = {
            let mut tables = lock(&self.inner.tables);
            tables.retain(|t| t.strong_count() > 0);
            tables.iter().filter_map(Weak::upgrade).collect()
        };
        tables.iter().map(|t| t.drain_all(error.clone())).sum()
    }

    fn current_link(&self) -> Option<Arc<dyn Link>> {
        lock(&self.inner.link).clone()
    }

    fn set_state(&self, state: ConnectionState) {
        debug!(client_id = %self.client_id(), %state, "connection state");
        self.inner.state.send_replace(state);
    }
}

#[async_trait]
impl Publisher for ConnectionManager {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> Result<(), TransportError> {
        ConnectionManager::publish(self, topic, payload, retain).await
    }
}
