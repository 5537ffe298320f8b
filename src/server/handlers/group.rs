use async_trait::async_trait;
use serde_json::{Value, json};

use super::{Handler, RequestContext, Services};
use crate::utils::error::HandlerError;

pub const LIST: &str = "group.list";

/// `group.list {all?}`: groups the caller belongs to, newest first.
/// `all: true` lists every group.
pub struct List;

#[async_trait]
impl Handler for List {
    async fn handle(&self, ctx: &RequestContext, services: &Services) -> Result<Value, HandlerError> {
        let caller = ctx.caller()?;
        let all = ctx.params.get("all").and_then(Value::as_bool) == Some(true);
        let member = if all { None } else { Some(caller) };

        let groups: Vec<Value> = services
            .directory
            .groups(member)
            .into_iter()
            .map(|g| {
                json!({
                    "group_id": g.group_id,
                    "name": g.name,
                    "creator_employee_id": g.creator_employee_id,
                    "member_count": g.members.len(),
                    "created_at": g.created_at,
                })
            })
            .collect();
        Ok(json!({ "groups": groups }))
    }
}
