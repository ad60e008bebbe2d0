//! Enrollment flow state tools.
//!
//! The `user_id` argument is injected server-side from the sender's wa_id
//! before execution; the model never supplies it, so one user cannot touch
//! another user's session.

use super::{Tool, ToolResult};
use crate::store::SqliteStore;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

fn require_user_id(args: &Value) -> Option<&str> {
    args.get("user_id").and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Report where the user currently is in the enrollment flow.
pub struct GetUserStepTool {
    store: Arc<SqliteStore>,
}

impl GetUserStepTool {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for GetUserStepTool {
    fn name(&self) -> &str {
        "get_user_step"
    }

    fn description(&self) -> &str {
        "Get the user's current enrollment step (motivation, program_selection, collect_personal_info, confirm_enrollment, enrollment_complete) and the info collected so far."
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let Some(user_id) = require_user_id(&args) else {
            return Ok(ToolResult::err("no user context"));
        };
        let step = self.store.user_step(user_id)?;
        let info = self.store.user_info(user_id)?;
        Ok(ToolResult::ok(format!(
            "current_step: {}\ncollected_info: {info}",
            step.as_str()
        )))
    }
}

/// Move the user to the next enrollment step.
pub struct AdvanceUserStepTool {
    store: Arc<SqliteStore>,
}

impl AdvanceUserStepTool {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for AdvanceUserStepTool {
    fn name(&self) -> &str {
        "advance_user_step"
    }

    fn description(&self) -> &str {
        "Advance the user to the next step of the enrollment flow. Call once the current step is complete."
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let Some(user_id) = require_user_id(&args) else {
            return Ok(ToolResult::err("no user context"));
        };
        let step = self.store.advance_user_step(user_id)?;
        Ok(ToolResult::ok(format!("advanced to: {}", step.as_str())))
    }
}

/// Record one collected piece of personal information.
pub struct UpdateUserInfoTool {
    store: Arc<SqliteStore>,
}

impl UpdateUserInfoTool {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for UpdateUserInfoTool {
    fn name(&self) -> &str {
        "update_user_info"
    }

    fn description(&self) -> &str {
        "Save one piece of information the user provided (first_name, last_name, email, phone, age, location, program)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "field": {"type": "string", "description": "Which field to set"},
                "value": {"type": "string", "description": "The value the user gave"}
            },
            "required": ["field", "value"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let Some(user_id) = require_user_id(&args) else {
            return Ok(ToolResult::err("no user context"));
        };
        let (Some(field), Some(value)) = (
            args.get("field").and_then(Value::as_str),
            args.get("value").and_then(Value::as_str),
        ) else {
            return Ok(ToolResult::err("field and value are required"));
        };
        if field.trim().is_empty() {
            return Ok(ToolResult::err("field must not be empty"));
        }
        self.store.update_user_info(user_id, field.trim(), value.trim())?;
        Ok(ToolResult::ok(format!("saved {field}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EnrollmentStep;

    fn store() -> Arc<SqliteStore> {
        Arc::new(SqliteStore::open_in_memory().unwrap())
    }

    #[tokio::test]
    async fn step_tool_reports_motivation_for_new_user() {
        let tool = GetUserStepTool::new(store());
        let result = tool
            .execute(json!({"user_id": "212600000001"}))
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.output.contains("motivation"));
    }

    #[tokio::test]
    async fn missing_user_context_is_an_error() {
        let tool = GetUserStepTool::new(store());
        let result = tool.execute(json!({})).await.unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn advance_moves_and_persists() {
        let store = store();
        let tool = AdvanceUserStepTool::new(store.clone());
        let result = tool
            .execute(json!({"user_id": "212600000001"}))
            .await
            .unwrap();
        assert!(result.output.contains("program_selection"));
        assert_eq!(
            store.user_step("212600000001").unwrap(),
            EnrollmentStep::ProgramSelection
        );
    }

    #[tokio::test]
    async fn update_info_saves_field() {
        let store = store();
        let tool = UpdateUserInfoTool::new(store.clone());
        let result = tool
            .execute(json!({
                "user_id": "212600000001",
                "field": "email",
                "value": "amina@example.com"
            }))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(
            store.user_info("212600000001").unwrap()["email"],
            "amina@example.com"
        );
    }

    #[tokio::test]
    async fn update_info_rejects_missing_args() {
        let tool = UpdateUserInfoTool::new(store());
        let result = tool
            .execute(json!({"user_id": "u", "field": "email"}))
            .await
            .unwrap();
        assert!(!result.success);
    }
}
