//! Final registration tool: writes the student record once all personal
//! information has been collected and confirmed.

use super::{Tool, ToolResult};
use crate::store::{NewRegistration, RegistrationOutcome, SqliteStore};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

pub struct RegisterStudentTool {
    store: Arc<SqliteStore>,
}

impl RegisterStudentTool {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self { store }
    }
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[async_trait]
impl Tool for RegisterStudentTool {
    fn name(&self) -> &str {
        "register_student"
    }

    fn description(&self) -> &str {
        "Register the student for a program. Only call after the user has confirmed. Requires location, first_name, last_name, email, phone and age."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "location": {"type": "string", "description": "Campus the student chose"},
                "first_name": {"type": "string"},
                "last_name": {"type": "string"},
                "email": {"type": "string"},
                "phone": {"type": "string"},
                "age": {"type": "integer"},
                "program_id": {"type": "integer", "description": "Optional program id from get_program_details"}
            },
            "required": ["location", "first_name", "last_name", "email", "phone", "age"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let Some(wa_id) = str_arg(&args, "user_id") else {
            return Ok(ToolResult::err("no user context"));
        };

        let mut missing = Vec::new();
        for field in ["location", "first_name", "last_name", "email", "phone"] {
            if str_arg(&args, field).is_none() {
                missing.push(field);
            }
        }
        let age = args.get("age").and_then(Value::as_i64);
        if age.is_none() {
            missing.push("age");
        }
        if !missing.is_empty() {
            return Ok(ToolResult::err(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }

        let email = str_arg(&args, "email").unwrap_or_default();
        if !email.contains('@') || !email.contains('.') {
            return Ok(ToolResult::err(format!("'{email}' is not a valid email")));
        }
        let age = age.unwrap_or_default();
        if !(15..=80).contains(&age) {
            return Ok(ToolResult::err("age must be between 15 and 80"));
        }

        let registration = NewRegistration {
            wa_id: wa_id.to_string(),
            first_name: str_arg(&args, "first_name").unwrap_or_default().to_string(),
            last_name: str_arg(&args, "last_name").unwrap_or_default().to_string(),
            email: email.to_string(),
            phone: str_arg(&args, "phone").unwrap_or_default().to_string(),
            age,
            location: str_arg(&args, "location").unwrap_or_default().to_string(),
            program_id: args.get("program_id").and_then(Value::as_i64),
        };

        match self.store.register_student(&registration)? {
            RegistrationOutcome::Registered { registration_id } => {
                self.store
                    .set_user_step(wa_id, crate::store::EnrollmentStep::EnrollmentComplete)?;
                Ok(ToolResult::ok(format!(
                    "registration confirmed, reference #{registration_id}"
                )))
            }
            RegistrationOutcome::AlreadyRegistered => Ok(ToolResult::ok(
                "this phone number or email is already registered",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EnrollmentStep;

    fn store() -> Arc<SqliteStore> {
        Arc::new(SqliteStore::open_in_memory().unwrap())
    }

    fn full_args() -> Value {
        json!({
            "user_id": "212600000001",
            "location": "Casablanca",
            "first_name": "Amina",
            "last_name": "Benali",
            "email": "amina@example.com",
            "phone": "+212600000001",
            "age": 24
        })
    }

    #[tokio::test]
    async fn registers_and_completes_enrollment() {
        let store = store();
        let tool = RegisterStudentTool::new(store.clone());
        let result = tool.execute(full_args()).await.unwrap();
        assert!(result.success, "{:?}", result.error);
        assert!(result.output.contains("registration confirmed"));
        assert_eq!(
            store.user_step("212600000001").unwrap(),
            EnrollmentStep::EnrollmentComplete
        );
    }

    #[tokio::test]
    async fn reports_missing_fields_by_name() {
        let tool = RegisterStudentTool::new(store());
        let mut args = full_args();
        args.as_object_mut().unwrap().remove("email");
        args.as_object_mut().unwrap().remove("age");
        let result = tool.execute(args).await.unwrap();
        assert!(!result.success);
        assert!(result.output.contains("email"));
        assert!(result.output.contains("age"));
    }

    #[tokio::test]
    async fn rejects_invalid_email() {
        let tool = RegisterStudentTool::new(store());
        let mut args = full_args();
        args["email"] = json!("not-an-email");
        let result = tool.execute(args).await.unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn rejects_implausible_age() {
        let tool = RegisterStudentTool::new(store());
        let mut args = full_args();
        args["age"] = json!(7);
        let result = tool.execute(args).await.unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn duplicate_registration_is_reported_not_errored() {
        let tool = RegisterStudentTool::new(store());
        assert!(tool.execute(full_args()).await.unwrap().success);
        let second = tool.execute(full_args()).await.unwrap();
        assert!(second.success);
        assert!(second.output.contains("already registered"));
    }
}
