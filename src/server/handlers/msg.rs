//! Message relay. Messages are not stored: a send is one push on the
//! recipient's inbox topic or the group topic.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use super::{Handler, RequestContext, Services, new_msg_id};
use crate::protocol::envelope::{GroupMessage, InboxMessage, iso_now};
use crate::utils::error::HandlerError;

pub const SEND_PRIVATE: &str = "msg.send_private";
pub const SEND_GROUP: &str = "msg.send_group";
pub const READ_ACK: &str = "msg.read_ack";

fn content(ctx: &RequestContext) -> Value {
    match ctx.params.get("content") {
        Some(Value::Null) | None => Value::String(String::new()),
        Some(value) => value.clone(),
    }
}

fn quote(ctx: &RequestContext) -> Option<String> {
    ctx.str_param("quote_msg_id").map(str::to_string)
}

fn encode<T: serde::Serialize>(payload: &T) -> Result<Vec<u8>, HandlerError> {
    serde_json::to_vec(payload).map_err(|e| HandlerError::Internal(e.to_string()))
}

/// `msg.send_private {to_employee_id, content, quote_msg_id?}`
pub struct SendPrivate;

#[async_trait]
impl Handler for SendPrivate {
    async fn handle(&self, ctx: &RequestContext, services: &Services) -> Result<Value, HandlerError> {
        let from = ctx.caller()?;
        let to = ctx
            .str_param("to_employee_id")
            .ok_or_else(|| HandlerError::BadRequest("Missing to_employee_id".to_string()))?;
        if services.directory.active_employee(to).is_none() {
            return Err(HandlerError::NotFound("Target employee not found".to_string()));
        }

        let message = InboxMessage {
            msg_id: new_msg_id(),
            kind: "private".to_string(),
            from_employee_id: from.to_string(),
            content: content(ctx),
            sent_at: iso_now(),
            quote_msg_id: quote(ctx),
        };
        let topic = services.topics.inbox(to);
        services
            .publisher
            .publish(&topic, encode(&message)?, false)
            .await?;
        debug!(msg_id = %message.msg_id, %from, %to, "private message relayed");

        Ok(json!({
            "msg_id": message.msg_id,
            "to_employee_id": to,
            "sent_at": message.sent_at,
        }))
    }
}

/// `msg.send_group {group_id, content, quote_msg_id?}`: members only.
pub struct SendGroup;

#[async_trait]
impl Handler for SendGroup {
    async fn handle(&self, ctx: &RequestContext, services: &Services) -> Result<Value, HandlerError> {
        let from = ctx.caller()?;
        let group_id = ctx
            .str_param("group_id")
            .ok_or_else(|| HandlerError::BadRequest("Missing group_id".to_string()))?;
        let is_member = services
            .directory
            .group(group_id)
            .is_some_and(|g| g.has_member(from));
        if !is_member {
            return Err(HandlerError::Forbidden("Not a group member".to_string()));
        }

        let message = GroupMessage {
            msg_id: new_msg_id(),
            group_id: group_id.to_string(),
            from_employee_id: from.to_string(),
            content: content(ctx),
            sent_at: iso_now(),
            quote_msg_id: quote(ctx),
        };
        let topic = services.topics.group(group_id);
        services
            .publisher
            .publish(&topic, encode(&message)?, false)
            .await?;
        debug!(msg_id = %message.msg_id, %from, %group_id, "group message relayed");

        Ok(json!({
            "msg_id": message.msg_id,
            "group_id": group_id,
            "sent_at": message.sent_at,
        }))
    }
}

/// `msg.read_ack {msg_id}`: acknowledged, nothing recorded.
pub struct ReadAck;

#[async_trait]
impl Handler for ReadAck {
    async fn handle(&self, ctx: &RequestContext, _services: &Services) -> Result<Value, HandlerError> {
        ctx.str_param("msg_id")
            .ok_or_else(|| HandlerError::BadRequest("Missing msg_id".to_string()))?;
        Ok(json!({}))
    }
}
