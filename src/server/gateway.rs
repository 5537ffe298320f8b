//! Gateway
//!
//! The broker-facing server loop: subscribes to `<rpc>/req/+/+` (behind a
//! `$share/<group>/` prefix when configured), hands every request to the
//! [`Dispatcher`] on its own task and publishes exactly one reply on the
//! mirror `resp` topic.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::connection::{ConnectionManager, Inbound, InboundMessage};
use crate::protocol::codec;
use crate::protocol::envelope::ResponseEnvelope;
use crate::protocol::topic::TopicScheme;
use crate::server::dispatcher::{Dispatcher, decode_failure};
use crate::utils::error::TransportError;

pub struct Gateway {
    conn: ConnectionManager,
    dispatcher: Arc<Dispatcher>,
    topics: TopicScheme,
    share_group: Option<String>,
    inbound: Option<Inbound>,
}

impl Gateway {
    pub fn new(
        conn: ConnectionManager,
        dispatcher: Dispatcher,
        topics: TopicScheme,
        share_group: Option<String>,
    ) -> Self {
        Self {
            conn,
            dispatcher: Arc::new(dispatcher),
            topics,
            share_group,
            inbound: None,
        }
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.conn
    }

    /// The request filter this gateway subscribes to.
    pub fn request_filter(&self) -> String {
        self.topics
            .shared_request_filter(self.share_group.as_deref())
    }

    /// Route, subscribe and connect. A failed connect keeps retrying in
    /// the background; the error is returned for the caller to report.
    pub async fn start(&mut self) -> Result<(), TransportError> {
        if self.inbound.is_none() {
            self.inbound = Some(self.conn.route(self.topics.request_prefix()));
        }
        let filter = self.request_filter();
        self.conn.subscribe(&filter).await?;
        self.conn.connect().await?;
        info!(%filter, "gateway subscribed");
        Ok(())
    }

    /// Serve requests until `shutdown` resolves, then disconnect.
    pub async fn serve<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let mut inbound = match self.inbound.take() {
            Some(inbound) => inbound,
            None => self.conn.route(self.topics.request_prefix()),
        };
        let mut shutdown = std::pin::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("gateway shutting down");
                    break;
                }
                msg = inbound.recv() => {
                    let Some(msg) = msg else { break };
                    tokio::spawn(serve_request(
                        self.conn.clone(),
                        self.dispatcher.clone(),
                        self.topics.clone(),
                        msg,
                    ));
                }
            }
        }

        self.conn.disconnect().await;
    }

    /// [`Gateway::start`] then [`Gateway::serve`].
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        if let Err(e) = self.start().await {
            warn!(error = %e, "gateway not connected yet, retrying in the background");
        }
        self.serve(shutdown).await;
    }
}

async fn serve_request(
    conn: ConnectionManager,
    dispatcher: Arc<Dispatcher>,
    topics: TopicScheme,
    msg: InboundMessage,
) {
    let start = Instant::now();
    let Some((client_id, seq_id)) = topics.parse_request(&msg.topic) else {
        debug!(topic = %msg.topic, "ignoring malformed request topic");
        return;
    };

    let (action, envelope) = match codec::decode_request(&msg.payload) {
        Ok(request) => {
            let action = request.action.clone();
            let envelope = dispatcher.dispatch(&client_id, &seq_id, request).await;
            (action, envelope)
        }
        Err(e) => ("-".to_string(), decode_failure(&e)),
    };

    let payload = match codec::encode_response(&envelope) {
        Ok(payload) => payload,
        Err(e) => {
            error!(%client_id, %seq_id, error = %e, "failed to encode response");
            match codec::encode_response(&ResponseEnvelope::server_error()) {
                Ok(payload) => payload,
                Err(_) => return,
            }
        }
    };

    let reply_topic = topics.response(&client_id, &seq_id);
    if let Err(e) = conn.publish(&reply_topic, payload, false).await {
        warn!(%client_id, %seq_id, error = %e, "failed to publish response");
    }

    info!(
        %client_id,
        %seq_id,
        %action,
        code = envelope.code,
        latency_ms = start.elapsed().as_millis() as u64,
        "request handled"
    );
}
