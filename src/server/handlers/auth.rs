use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;

use super::{Handler, RequestContext, Services};
use crate::utils::error::HandlerError;

pub const BIND: &str = "auth.bind";

/// `auth.bind {employee_id, device_info?}`: bind this connection to an
/// active employee. Re-binding replaces the previous account.
pub struct Bind;

#[async_trait]
impl Handler for Bind {
    async fn handle(&self, ctx: &RequestContext, services: &Services) -> Result<Value, HandlerError> {
        let employee_id = ctx
            .str_param("employee_id")
            .ok_or_else(|| HandlerError::BadRequest("Missing employee_id".to_string()))?;

        if services.directory.active_employee(employee_id).is_none() {
            return Err(HandlerError::NotFound(
                "Employee not found or disabled".to_string(),
            ));
        }

        let device_info = ctx.str_param("device_info");
        services
            .sessions
            .bind(&ctx.client_id, employee_id, device_info)?;
        info!(client_id = %ctx.client_id, %employee_id, "connection bound");
        Ok(json!({}))
    }
}
