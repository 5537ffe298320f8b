use async_trait::async_trait;
use serde_json::{Value, json};

use super::{Handler, RequestContext, Services};
use crate::utils::error::HandlerError;

pub const TREE: &str = "org.tree";

/// `org.tree`: every department and every active employee.
pub struct Tree;

#[async_trait]
impl Handler for Tree {
    async fn handle(&self, _ctx: &RequestContext, services: &Services) -> Result<Value, HandlerError> {
        let departments: Vec<Value> = services
            .directory
            .departments()
            .into_iter()
            .map(|d| {
                json!({
                    "department_id": d.department_id,
                    "name": d.name,
                    "parent_id": d.parent_id,
                    "sort_order": d.sort_order,
                })
            })
            .collect();

        let employees: Vec<Value> = services
            .directory
            .active_employees()
            .into_iter()
            .map(|e| {
                json!({
                    "employee_id": e.employee_id,
                    "name": e.name,
                    "department_id": e.department_id,
                    "manager_id": e.manager_id,
                    "is_ai_agent": e.is_ai_agent,
                    "skills_badge": e.skills_badge,
                })
            })
            .collect();

        Ok(json!({ "departments": departments, "employees": employees }))
    }
}
