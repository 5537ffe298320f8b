//! Role multiplexer
//!
//! Several logical roles (for example `operator` and `node`) share one
//! [`ConnectionManager`]. Each role owns the topic subtree
//! `<gateway>/<identity>/<role>/{req,res,evt}` and its own event stream,
//! but never its own socket.
//!
//! - `open()` registers the role and then drives connect-and-subscribe
//!   inside one critical section shared by every role.
//! - `send()` goes through a publish lock shared by every role.
//! - inbound frames are routed by the role path segment; frames for a
//!   role with no open transport are dropped.
//! - `close()` removes only its own role and refuses further sends. A
//!   physical connection loss closes every role.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::correlation::CorrelationTable;
use crate::connection::{ConnectionManager, ConnectionState, DrainOnLoss, Inbound};
use crate::protocol::codec::{self, RoleFrame};
use crate::protocol::envelope::ResponseEnvelope;
use crate::protocol::topic::{RoleTopics, generate_sequence_id, role_of, role_root};
use crate::utils::error::{RpcError, TransportError};

/// What a role transport observes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleEvent {
    Opened,
    /// One sanitized JSON frame from the role's `res` or `evt` topic.
    Message(String),
    Closed(String),
}

pub type RoleEvents = mpsc::UnboundedReceiver<RoleEvent>;

struct RoleSlot {
    id: u64,
    events: mpsc::UnboundedSender<RoleEvent>,
    closed: Arc<watch::Sender<bool>>,
}

impl RoleSlot {
    fn close(self, reason: &str) {
        let _ = self.events.send(RoleEvent::Closed(reason.to_string()));
        self.closed.send_replace(true);
    }
}

struct MuxShared {
    conn: ConnectionManager,
    identity: String,
    gateway_prefix: String,
    roles: Mutex<HashMap<String, RoleSlot>>,
    next_id: AtomicU64,
    open_lock: tokio::sync::Mutex<()>,
    publish_lock: tokio::sync::Mutex<()>,
}

impl MuxShared {
    fn roles(&self) -> MutexGuard<'_, HashMap<String, RoleSlot>> {
        self.roles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Remove `role` only if it still belongs to the transport `id`.
    fn release(&self, role: &str, id: u64) -> Option<RoleSlot> {
        let mut roles = self.roles();
        if roles.get(role).is_some_and(|slot| slot.id == id) {
            roles.remove(role)
        } else {
            None
        }
    }

    fn close_all(&self, reason: &str) {
        let slots: Vec<(String, RoleSlot)> = self.roles().drain().collect();
        for (role, slot) in slots {
            debug!(%role, %reason, "closing role transport");
            slot.close(reason);
        }
    }
}

pub struct Multiplexer {
    shared: Arc<MuxShared>,
    tasks: Vec<JoinHandle<()>>,
}

impl Multiplexer {
    /// Multiplex roles for `identity` over `conn`. Must be called inside a
    /// Tokio runtime.
    pub fn new(conn: ConnectionManager, identity: &str, gateway_prefix: &str) -> Self {
        let inbound = conn.route(role_root(gateway_prefix, identity));
        let states = conn.watch_state();
        let shared = Arc::new(MuxShared {
            conn,
            identity: identity.to_string(),
            gateway_prefix: gateway_prefix.to_string(),
            roles: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            open_lock: tokio::sync::Mutex::new(()),
            publish_lock: tokio::sync::Mutex::new(()),
        });
        let tasks = vec![
            tokio::spawn(demultiplex(shared.clone(), inbound)),
            tokio::spawn(watch_link(shared.clone(), states)),
        ];
        Self { shared, tasks }
    }

    /// A transport for `role`. Nothing is registered until it is opened.
    pub fn transport(&self, role: &str) -> RoleTransport {
        let (closed, _) = watch::channel(false);
        RoleTransport {
            id: self.shared.next_id.fetch_add(1, Ordering::SeqCst),
            topics: RoleTopics::new(&self.shared.gateway_prefix, &self.shared.identity, role),
            shared: self.shared.clone(),
            closed: Arc::new(closed),
        }
    }

    /// Roles with an open transport, sorted.
    pub fn roles(&self) -> Vec<String> {
        let mut roles: Vec<String> = self.shared.roles().keys().cloned().collect();
        roles.sort();
        roles
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.shared.conn
    }

    /// Close every role and the shared connection.
    pub async fn shutdown(&self) {
        self.shared.close_all("multiplexer shut down");
        self.shared.conn.disconnect().await;
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

pub struct RoleTransport {
    id: u64,
    topics: RoleTopics,
    shared: Arc<MuxShared>,
    closed: Arc<watch::Sender<bool>>,
}

impl RoleTransport {
    pub fn role(&self) -> &str {
        &self.topics.role
    }

    pub fn topics(&self) -> &RoleTopics {
        &self.topics
    }

    /// Register the role, then connect and subscribe its `res`/`evt`
    /// topics. Only one role drives the handshake at a time.
    pub async fn open(&self) -> Result<RoleEvents, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.closed.send_replace(false);
        let previous = self.shared.roles().insert(
            self.topics.role.clone(),
            RoleSlot {
                id: self.id,
                events: tx.clone(),
                closed: self.closed.clone(),
            },
        );
        match previous {
            // Re-opening this same transport: end the old event stream only.
            Some(previous) if previous.id == self.id => {
                let _ = previous.events.send(RoleEvent::Closed("reopened".to_string()));
            }
            Some(previous) => previous.close("replaced by a new transport"),
            None => {}
        }

        let result = {
            let _open = self.shared.open_lock.lock().await;
            self.connect_and_subscribe().await
        };
        match result {
            Ok(()) => {
                info!(role = %self.topics.role, "role transport open");
                let _ = tx.send(RoleEvent::Opened);
                Ok(rx)
            }
            Err(e) => {
                warn!(role = %self.topics.role, error = %e, "role transport failed to open");
                self.shared.release(&self.topics.role, self.id);
                self.closed.send_replace(true);
                Err(e)
            }
        }
    }

    async fn connect_and_subscribe(&self) -> Result<(), TransportError> {
        let conn = &self.shared.conn;
        conn.subscribe(&self.topics.res).await?;
        conn.subscribe(&self.topics.evt).await?;
        conn.connect().await?;
        if conn.is_connected() {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }

    /// Publish one JSON frame on the role's `req` topic.
    ///
    /// A frame that is empty after sanitizing is skipped. A publish failure
    /// closes this role.
    pub async fn send(&self, json: &str) -> Result<(), TransportError> {
        let Some(payload) = codec::prepare_outbound(json) else {
            warn!(role = %self.topics.role, topic = %self.topics.req, "send skipped: payload empty after sanitize");
            return Ok(());
        };

        let _publish = self.shared.publish_lock.lock().await;
        if self.is_closed() {
            return Err(TransportError::Disconnected);
        }
        let conn = &self.shared.conn;
        if !conn.is_connected() {
            self.close_with("not connected");
            return Err(TransportError::NotConnected);
        }
        debug!(role = %self.topics.role, topic = %self.topics.req, len = payload.len(), "role send");
        if let Err(e) = conn.publish(&self.topics.req, payload, false).await {
            warn!(role = %self.topics.role, error = %e, "role publish failed");
            self.close_with(&format!("publish failed: {e}"));
            return Err(e);
        }
        Ok(())
    }

    /// Remove this role only. Other roles and the connection are untouched.
    pub async fn close(&self) {
        if let Some(slot) = self.shared.release(&self.topics.role, self.id) {
            slot.close("closed");
        }
        self.closed.send_replace(true);
        let conn = &self.shared.conn;
        for topic in [&self.topics.res, &self.topics.evt] {
            if let Err(e) = conn.unsubscribe(topic).await {
                debug!(%topic, error = %e, "role unsubscribe failed");
            }
        }
    }

    fn close_with(&self, reason: &str) {
        if let Some(slot) = self.shared.release(&self.topics.role, self.id) {
            slot.close(reason);
        }
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once this transport has been closed.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

async fn demultiplex(shared: Arc<MuxShared>, mut inbound: Inbound) {
    let root = role_root(&shared.gateway_prefix, &shared.identity);
    while let Some(msg) = inbound.recv().await {
        let Some(role) = role_of(&root, &msg.topic) else {
            continue;
        };
        let text = codec::sanitize(&String::from_utf8_lossy(&msg.payload));
        if !(text.starts_with('{') || text.starts_with('[')) {
            warn!(topic = %msg.topic, "ignoring non-JSON role frame");
            continue;
        }
        let roles = shared.roles();
        match roles.get(role) {
            Some(slot) => {
                let _ = slot.events.send(RoleEvent::Message(text));
            }
            None => debug!(%role, "dropping frame for unopened role"),
        }
    }
}

async fn watch_link(shared: Arc<MuxShared>, mut states: watch::Receiver<ConnectionState>) {
    let mut was_connected = states.borrow_and_update().is_connected();
    while states.changed().await.is_ok() {
        let state = states.borrow_and_update().clone();
        if was_connected && !state.is_connected() {
            shared.close_all(&format!("connection lost ({state})"));
        }
        was_connected = state.is_connected();
    }
}

/// Request/response over one role, with its own correlation table.
///
/// Replies are matched on the `seq_id` carried inside the frame; frames
/// without one are surfaced as role events.
pub struct RoleClient {
    transport: RoleTransport,
    table: Arc<CorrelationTable>,
    events: mpsc::UnboundedReceiver<Value>,
    timeout: Duration,
    pump: JoinHandle<()>,
}

impl RoleClient {
    pub async fn open(
        mux: &Multiplexer,
        role: &str,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let transport = mux.transport(role);
        let table = CorrelationTable::new();
        let frames = transport.open().await?;
        let (events_tx, events) = mpsc::unbounded_channel();
        let pump = tokio::spawn(pump_role(
            role.to_string(),
            table.clone(),
            frames,
            events_tx,
        ));
        Ok(Self {
            transport,
            table,
            events,
            timeout,
            pump,
        })
    }

    pub fn role(&self) -> &str {
        self.transport.role()
    }

    pub fn transport(&self) -> &RoleTransport {
        &self.transport
    }

    pub fn pending(&self) -> Arc<CorrelationTable> {
        self.table.clone()
    }

    pub async fn request(
        &self,
        action: &str,
        params: Map<String, Value>,
    ) -> Result<ResponseEnvelope, RpcError> {
        let seq_id = generate_sequence_id();
        let frame = codec::encode_role_request(action, &seq_id, &params)?;
        let handle = self.table.register(&seq_id, self.timeout)?;
        if let Err(e) = self.transport.send(&frame).await {
            self.table.fail(&seq_id, RpcError::Transport(e));
        }
        handle.wait().await
    }

    /// Next unsolicited event on this role; `None` once the role closed.
    pub async fn next_event(&mut self) -> Option<Value> {
        self.events.recv().await
    }

    pub async fn close(self) {
        self.transport.close().await;
        self.table.drain_all(RpcError::Disconnected);
        self.pump.abort();
    }
}

async fn pump_role(
    role: String,
    table: Arc<CorrelationTable>,
    mut frames: RoleEvents,
    events: mpsc::UnboundedSender<Value>,
) {
    while let Some(event) = frames.recv().await {
        match event {
            RoleEvent::Opened => {}
            RoleEvent::Message(text) => match codec::decode_role_frame(&text) {
                Ok(RoleFrame::Response { seq_id, envelope }) => {
                    table.resolve(&seq_id, envelope);
                }
                Ok(RoleFrame::Event(value)) => {
                    let _ = events.send(value);
                }
                Err(e) => warn!(%role, error = %e, "malformed role frame"),
            },
            RoleEvent::Closed(reason) => {
                let failed = table.drain_all(RpcError::Disconnected);
                debug!(%role, %reason, failed, "role closed");
                break;
            }
        }
    }
}
