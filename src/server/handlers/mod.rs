//! Business handlers, one per action.
//!
//! A handler sees the decoded parameters and the resolved caller and
//! returns the `data` of a success envelope. Protocol and business
//! failures are [`HandlerError`]s; the dispatcher turns them into
//! envelopes.

pub mod auth;
pub mod group;
pub mod msg;
pub mod org;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::connection::Publisher;
use crate::persistence::{Directory, SessionDirectory};
use crate::protocol::topic::TopicScheme;
use crate::utils::error::HandlerError;

/// One inbound request as a handler sees it.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub client_id: String,
    pub seq_id: String,
    pub action: String,
    pub params: Map<String, Value>,
    /// Account bound to `client_id`, if any.
    pub account_id: Option<String>,
}

impl RequestContext {
    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.params
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// The bound caller. Only `auth.bind` runs without one.
    pub fn caller(&self) -> Result<&str, HandlerError> {
        self.account_id
            .as_deref()
            .ok_or_else(|| HandlerError::Forbidden("Unauthorized".to_string()))
    }
}

/// Collaborators shared by every handler.
#[derive(Clone)]
pub struct Services {
    pub sessions: Arc<dyn SessionDirectory>,
    pub directory: Arc<dyn Directory>,
    pub publisher: Arc<dyn Publisher>,
    pub topics: TopicScheme,
}

#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: &RequestContext, services: &Services)
    -> Result<Value, HandlerError>;
}

/// The action table the gateway serves.
pub fn default_handlers() -> Vec<(&'static str, Arc<dyn Handler>)> {
    let table: [(&'static str, Arc<dyn Handler>); 6] = [
        (auth::BIND, Arc::new(auth::Bind)),
        (org::TREE, Arc::new(org::Tree)),
        (group::LIST, Arc::new(group::List)),
        (msg::SEND_PRIVATE, Arc::new(msg::SendPrivate)),
        (msg::SEND_GROUP, Arc::new(msg::SendGroup)),
        (msg::READ_ACK, Arc::new(msg::ReadAck)),
    ];
    table.into()
}

/// `msg_` followed by 12 hex characters.
pub fn new_msg_id() -> String {
    format!("msg_{}", &Uuid::new_v4().simple().to_string()[..12])
}
