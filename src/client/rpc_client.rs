//! RPC client
//!
//! The SDK facade over one [`ConnectionManager`]. Requests go out on
//! `<rpc>/req/<identity>/<seqId>` and their replies come back on the mirror
//! `resp` topic, where a route task resolves them in the
//! [`CorrelationTable`]. Inbox and group pushes arrive on their own routes
//! and are re-published as [`PushEvent`]s on a broadcast channel.
//!
//! After every successful (re)connect the client announces itself
//! (retained `online` presence, with an `offline` last will) and binds the
//! connection to its account with `auth.bind`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::correlation::CorrelationTable;
use crate::config::Settings;
use crate::connection::{Backoff, ConnectionManager, ConnectionState, Inbound};
use crate::protocol::codec;
use crate::protocol::envelope::{GroupMessage, InboxMessage, PresenceStatus, ResponseEnvelope};
use crate::protocol::topic::{ConnectionIdentity, TopicScheme, generate_sequence_id};
use crate::transport::{ConnectOptions, Connector, LastWill};
use crate::utils::error::{RpcError, TransportError};

/// Action that binds a connection to an account.
pub const BIND_ACTION: &str = "auth.bind";

const PUSH_BUFFER: usize = 256;

/// Per-client settings that are not part of the broker handshake.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub account_id: String,
    pub device_info: Option<String>,
    pub identity: ConnectionIdentity,
    pub request_timeout: Duration,
    pub skip_auth_bind: bool,
    pub topics: TopicScheme,
}

impl ClientOptions {
    pub fn new(account_id: &str, identity: ConnectionIdentity) -> Self {
        Self {
            account_id: account_id.to_string(),
            device_info: None,
            identity,
            request_timeout: Duration::from_secs(30),
            skip_auth_bind: false,
            topics: TopicScheme::default(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let client = &settings.client;
        let identity = client
            .identity
            .as_deref()
            .and_then(ConnectionIdentity::explicit)
            .unwrap_or_else(|| ConnectionIdentity::generate(&client.account_id, "rs"));
        Self {
            account_id: client.account_id.clone(),
            device_info: client.device_id.clone(),
            identity,
            request_timeout: Duration::from_millis(client.request_timeout_ms),
            skip_auth_bind: client.skip_auth_bind,
            topics: settings.topic_scheme(),
        }
    }
}

/// A push delivered outside any request/response exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    Inbox(InboxMessage),
    Group(GroupMessage),
}

struct Shared {
    conn: ConnectionManager,
    table: Arc<CorrelationTable>,
    options: ClientOptions,
    events: broadcast::Sender<PushEvent>,
    state: watch::Sender<ConnectionState>,
    ready: watch::Sender<Option<Result<(), RpcError>>>,
}

pub struct RpcClient {
    shared: Arc<Shared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RpcClient {
    /// Build a client. Must be called inside a Tokio runtime; nothing is
    /// sent until [`RpcClient::connect`].
    pub fn new(
        connector: Arc<dyn Connector>,
        mut connect: ConnectOptions,
        backoff: Backoff,
        options: ClientOptions,
    ) -> Self {
        let topics = &options.topics;
        let identity = options.identity.as_str();
        if let Ok(offline) = serde_json::to_vec(&PresenceStatus::offline()) {
            connect.last_will = Some(LastWill {
                topic: topics.status(&options.account_id),
                payload: offline,
                retain: true,
            });
        }

        let conn = ConnectionManager::new(connector, connect, backoff);
        let table = CorrelationTable::new();
        conn.attach(&table);

        let replies = conn.route(topics.response_prefix(identity));
        let inbox = conn.route(topics.inbox(&options.account_id));
        let groups = conn.route(topics.group_prefix());
        let states = conn.watch_state();

        let (events, _) = broadcast::channel(PUSH_BUFFER);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (ready, _) = watch::channel(None);
        let shared = Arc::new(Shared {
            conn,
            table,
            options,
            events,
            state,
            ready,
        });

        let tasks = vec![
            tokio::spawn(correlate_replies(shared.clone(), replies)),
            tokio::spawn(forward_inbox(shared.clone(), inbox)),
            tokio::spawn(forward_groups(shared.clone(), groups)),
            tokio::spawn(follow_connection(shared.clone(), states)),
        ];
        Self {
            shared,
            tasks: Mutex::new(tasks),
        }
    }

    pub fn from_settings(settings: &Settings, connector: Arc<dyn Connector>) -> Self {
        let options = ClientOptions::from_settings(settings);
        let connect = settings.connect_options(options.identity.as_str());
        Self::new(connector, connect, settings.backoff(), options)
    }

    pub fn identity(&self) -> &ConnectionIdentity {
        &self.shared.options.identity
    }

    pub fn account_id(&self) -> &str {
        &self.shared.options.account_id
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.shared.conn
    }

    pub fn pending(&self) -> Arc<CorrelationTable> {
        self.shared.table.clone()
    }

    /// Connect, subscribe, announce presence and bind.
    ///
    /// Resolves once the session is usable. A failed bind is returned here
    /// and shown as an `Error` state; the link itself stays up.
    pub async fn connect(&self) -> Result<(), RpcError> {
        let shared = &self.shared;
        let topics = &shared.options.topics;
        shared
            .conn
            .subscribe(&topics.response_filter(shared.options.identity.as_str()))
            .await?;
        shared
            .conn
            .subscribe(&topics.inbox(&shared.options.account_id))
            .await?;

        if shared.conn.is_connected() {
            return Ok(());
        }
        let mut ready = shared.ready.subscribe();
        ready.borrow_and_update();
        shared.conn.connect().await?;
        loop {
            ready
                .changed()
                .await
                .map_err(|_| RpcError::Disconnected)?;
            if let Some(outcome) = ready.borrow_and_update().clone() {
                return outcome;
            }
        }
    }

    /// Issue `action` and await its reply envelope, whatever its code.
    pub async fn request(
        &self,
        action: &str,
        params: Map<String, Value>,
    ) -> Result<ResponseEnvelope, RpcError> {
        self.shared
            .request(action, params, self.shared.options.request_timeout)
            .await
    }

    pub async fn request_with_timeout(
        &self,
        action: &str,
        params: Map<String, Value>,
        timeout: Duration,
    ) -> Result<ResponseEnvelope, RpcError> {
        self.shared.request(action, params, timeout).await
    }

    /// Issue `action` and return its `data`; a non-zero code is an error.
    pub async fn call(
        &self,
        action: &str,
        params: Map<String, Value>,
    ) -> Result<Option<Value>, RpcError> {
        let reply = self.request(action, params).await?;
        if reply.is_ok() {
            Ok(reply.data)
        } else {
            Err(RpcError::Remote {
                code: reply.code,
                message: reply.message,
            })
        }
    }

    /// Receive pushes from now on.
    pub fn events(&self) -> broadcast::Receiver<PushEvent> {
        self.shared.events.subscribe()
    }

    pub async fn subscribe_group(&self, group_id: &str) -> Result<(), TransportError> {
        let topic = self.shared.options.topics.group(group_id);
        self.shared.conn.subscribe(&topic).await
    }

    pub async fn unsubscribe_group(&self, group_id: &str) -> Result<(), TransportError> {
        let topic = self.shared.options.topics.group(group_id);
        self.shared.conn.unsubscribe(&topic).await
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Publish `offline`, close the link and fail every pending call.
    pub async fn disconnect(&self) {
        let shared = &self.shared;
        if shared.conn.is_connected() {
            shared.publish_presence(PresenceStatus::offline()).await;
        }
        shared.conn.disconnect().await;
        info!(identity = %shared.options.identity, "client disconnected");
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        let tasks = self
            .tasks
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

impl Shared {
    async fn request(
        &self,
        action: &str,
        params: Map<String, Value>,
        timeout: Duration,
    ) -> Result<ResponseEnvelope, RpcError> {
        let payload = codec::encode_request(action, &params)?;
        let seq_id = generate_sequence_id();
        let handle = self.table.register(&seq_id, timeout)?;
        let topic = self
            .options
            .topics
            .request(self.options.identity.as_str(), &seq_id);

        debug!(%seq_id, %action, %topic, "sending request");
        if let Err(e) = self.conn.publish(&topic, payload, false).await {
            warn!(%seq_id, %action, error = %e, "request publish failed");
            self.table.fail(&seq_id, RpcError::Transport(e));
        }
        handle.wait().await
    }

    async fn publish_presence(&self, status: PresenceStatus) {
        let topic = self.options.topics.status(&self.options.account_id);
        let payload = match serde_json::to_vec(&status) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "failed to encode presence");
                return;
            }
        };
        if let Err(e) = self.conn.publish(&topic, payload, true).await {
            warn!(%topic, error = %e, "presence publish failed");
        }
    }

    async fn on_connected(&self) -> Result<(), RpcError> {
        self.publish_presence(PresenceStatus::online()).await;
        if self.options.skip_auth_bind {
            return Ok(());
        }

        let mut params = Map::new();
        params.insert(
            "employee_id".to_string(),
            Value::String(self.options.account_id.clone()),
        );
        if let Some(device) = &self.options.device_info {
            params.insert("device_info".to_string(), Value::String(device.clone()));
        }
        let reply = self
            .request(BIND_ACTION, params, self.options.request_timeout)
            .await?;
        if reply.is_ok() {
            info!(account_id = %self.options.account_id, identity = %self.options.identity, "session bound");
            Ok(())
        } else {
            Err(RpcError::Remote {
                code: reply.code,
                message: reply.message,
            })
        }
    }
}

async fn correlate_replies(shared: Arc<Shared>, mut inbound: Inbound) {
    let identity = shared.options.identity.as_str();
    while let Some(msg) = inbound.recv().await {
        let Some(seq_id) = shared.options.topics.parse_response(identity, &msg.topic) else {
            debug!(topic = %msg.topic, "ignoring reply on unexpected topic");
            continue;
        };
        match codec::decode_response(&msg.payload) {
            Ok(envelope) => {
                shared.table.resolve(seq_id, envelope);
            }
            Err(e) => {
                warn!(%seq_id, error = %e, "malformed reply");
                shared
                    .table
                    .fail(seq_id, RpcError::InvalidResponse(e.to_string()));
            }
        }
    }
}

async fn forward_inbox(shared: Arc<Shared>, mut inbound: Inbound) {
    let topic = shared.options.topics.inbox(&shared.options.account_id);
    while let Some(msg) = inbound.recv().await {
        if msg.topic != topic {
            continue;
        }
        match serde_json::from_slice::<InboxMessage>(&codec::sanitize_bytes(&msg.payload)) {
            Ok(message) => {
                let _ = shared.events.send(PushEvent::Inbox(message));
            }
            Err(e) => warn!(topic = %msg.topic, error = %e, "dropping malformed inbox push"),
        }
    }
}

async fn forward_groups(shared: Arc<Shared>, mut inbound: Inbound) {
    while let Some(msg) = inbound.recv().await {
        match serde_json::from_slice::<GroupMessage>(&codec::sanitize_bytes(&msg.payload)) {
            Ok(message) => {
                let _ = shared.events.send(PushEvent::Group(message));
            }
            Err(e) => warn!(topic = %msg.topic, error = %e, "dropping malformed group push"),
        }
    }
}

async fn follow_connection(shared: Arc<Shared>, mut states: watch::Receiver<ConnectionState>) {
    loop {
        let state = states.borrow_and_update().clone();
        if state.is_connected() {
            let outcome = shared.on_connected().await;
            match &outcome {
                Ok(()) => {
                    shared.state.send_replace(ConnectionState::Connected);
                }
                Err(e) => {
                    warn!(error = %e, "auth.bind failed");
                    shared
                        .state
                        .send_replace(ConnectionState::Error(format!("auth.bind failed: {e}")));
                }
            }
            shared.ready.send_replace(Some(outcome));
        } else {
            shared.state.send_replace(state);
        }
        if states.changed().await.is_err() {
            break;
        }
    }
}
