//! Request dispatcher
//!
//! A function of (action, params, caller) to exactly one
//! [`ResponseEnvelope`]:
//! 1. the connection client id is resolved to an account through the
//!    session directory; an unbound caller gets 401 unless the action is
//!    `auth.bind`
//! 2. the action is looked up in the handler table; unknown actions get
//!    400 naming the action
//! 3. handler errors become their envelope, and a handler panic becomes
//!    a generic 500 with the detail logged here only

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{error, warn};

use crate::protocol::codec;
use crate::protocol::envelope::{RequestEnvelope, ResponseEnvelope, code};
use crate::server::handlers::{self, Handler, RequestContext, Services};
use crate::utils::error::{CodecError, HandlerError};

/// Actions callable on a connection that has not bound yet.
const NO_AUTH_ACTIONS: &[&str] = &[handlers::auth::BIND];

pub struct Dispatcher {
    handlers: HashMap<String, Arc<dyn Handler>>,
    services: Services,
}

impl Dispatcher {
    /// A dispatcher serving the default action table.
    pub fn new(services: Services) -> Self {
        let mut dispatcher = Self::empty(services);
        for (action, handler) in handlers::default_handlers() {
            dispatcher.register(action, handler);
        }
        dispatcher
    }

    pub fn empty(services: Services) -> Self {
        Self {
            handlers: HashMap::new(),
            services,
        }
    }

    pub fn register(&mut self, action: &str, handler: Arc<dyn Handler>) {
        self.handlers.insert(action.to_string(), handler);
    }

    /// Registered action names, sorted.
    pub fn actions(&self) -> Vec<&str> {
        let mut actions: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        actions.sort_unstable();
        actions
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Decode a raw request payload and dispatch it.
    pub async fn handle_payload(
        &self,
        client_id: &str,
        seq_id: &str,
        payload: &[u8],
    ) -> ResponseEnvelope {
        match codec::decode_request(payload) {
            Ok(request) => self.dispatch(client_id, seq_id, request).await,
            Err(e) => decode_failure(&e),
        }
    }

    pub async fn dispatch(
        &self,
        client_id: &str,
        seq_id: &str,
        request: RequestEnvelope,
    ) -> ResponseEnvelope {
        let account_id = match self.services.sessions.lookup(client_id) {
            Ok(account_id) => account_id,
            Err(e) => {
                error!(%client_id, %seq_id, error = %e, "session lookup failed");
                return ResponseEnvelope::server_error();
            }
        };

        let action = request.action;
        if account_id.is_none() && !NO_AUTH_ACTIONS.contains(&action.as_str()) {
            return ResponseEnvelope::unauthorized();
        }

        let Some(handler) = self.handlers.get(&action).cloned() else {
            return ResponseEnvelope::error(code::BAD_REQUEST, format!("Unknown action: {action}"));
        };

        let ctx = RequestContext {
            client_id: client_id.to_string(),
            seq_id: seq_id.to_string(),
            action,
            params: request.params,
            account_id,
        };

        let outcome = AssertUnwindSafe(handler.handle(&ctx, &self.services))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(data)) => ResponseEnvelope::ok(data),
            Ok(Err(HandlerError::Internal(detail))) => {
                error!(%client_id, %seq_id, action = %ctx.action, %detail, "handler failed");
                ResponseEnvelope::server_error()
            }
            Ok(Err(e)) => e.into_envelope(),
            Err(panic) => {
                error!(
                    %client_id,
                    %seq_id,
                    action = %ctx.action,
                    panic = %panic_message(panic.as_ref()),
                    "handler panicked"
                );
                ResponseEnvelope::server_error()
            }
        }
    }
}

/// The envelope for a payload that could not be decoded.
pub fn decode_failure(error: &CodecError) -> ResponseEnvelope {
    warn!(%error, "undecodable request");
    match error {
        CodecError::MissingAction | CodecError::NotAnObject => {
            ResponseEnvelope::error(code::BAD_REQUEST, "Missing action")
        }
        CodecError::InvalidJson(_) | CodecError::EmptyPayload => {
            ResponseEnvelope::error(code::BAD_REQUEST, "Invalid JSON")
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
