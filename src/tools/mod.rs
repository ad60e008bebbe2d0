//! Tool calling: trait, call protocol, and the enrollment tool set.
//!
//! The model is prompt-guided: it emits `<tool_call>{"name":..,"arguments":..}</tool_call>`
//! blocks, and results flow back as a `[Tool results]` user turn containing
//! `<tool_result>` blocks.

pub mod enrollment;
pub mod programs;
pub mod register;

use crate::store::SqliteStore;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Write;
use std::sync::Arc;

/// Result of executing a tool.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            output: error.clone(),
            error: Some(error),
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;
    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult>;
}

/// A tool invocation parsed out of model output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedToolCall {
    pub name: String,
    pub arguments: Value,
}

/// Split model output into surrounding text and `<tool_call>` invocations.
/// Malformed JSON inside a block is logged and skipped.
pub fn parse_tool_calls(response: &str) -> (String, Vec<ParsedToolCall>) {
    const OPEN: &str = "<tool_call>";
    const CLOSE: &str = "</tool_call>";

    let mut text_parts = Vec::new();
    let mut calls = Vec::new();
    let mut remaining = response;

    while let Some(start) = remaining.find(OPEN) {
        let before = &remaining[..start];
        if !before.trim().is_empty() {
            text_parts.push(before.trim().to_string());
        }

        let Some(end) = remaining[start..].find(CLOSE) else {
            // Unterminated block: drop it, keep what came before.
            remaining = "";
            break;
        };

        let inner = &remaining[start + OPEN.len()..start + end];
        match serde_json::from_str::<Value>(inner.trim()) {
            Ok(parsed) => {
                let name = parsed
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();
                if !name.is_empty() {
                    let arguments = parsed
                        .get("arguments")
                        .cloned()
                        .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
                    calls.push(ParsedToolCall { name, arguments });
                }
            }
            Err(e) => {
                tracing::warn!("malformed <tool_call> JSON: {e}");
            }
        }
        remaining = &remaining[start + end + CLOSE.len()..];
    }

    if !remaining.trim().is_empty() {
        text_parts.push(remaining.trim().to_string());
    }

    (text_parts.join("\n"), calls)
}

/// Render executed tool results as the feedback turn fed back to the model.
pub fn format_tool_results(results: &[(String, ToolResult)]) -> String {
    let mut content = String::from("[Tool results]\n");
    for (name, result) in results {
        let status = if result.success { "ok" } else { "error" };
        let _ = writeln!(
            content,
            "<tool_result name=\"{name}\" status=\"{status}\">\n{}\n</tool_result>",
            result.output
        );
    }
    content
}

/// Render the tool catalog and call protocol for the system prompt.
pub fn prompt_instructions(tools: &[Arc<dyn Tool>]) -> String {
    let mut instructions = String::from(
        "You can call tools. To call one, reply with exactly:\n\
         <tool_call>{\"name\": \"tool_name\", \"arguments\": {...}}</tool_call>\n\
         Available tools:\n",
    );
    for tool in tools {
        let _ = writeln!(
            instructions,
            "- {}: {}\n  parameters: {}",
            tool.name(),
            tool.description(),
            tool.parameters_schema()
        );
    }
    instructions
}

/// The full enrollment tool set, all backed by the same store.
pub fn enrollment_tools(store: Arc<SqliteStore>) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(programs::GetBootcampInfoTool::new(store.clone())),
        Arc::new(programs::GetAvailableSessionsTool::new(store.clone())),
        Arc::new(programs::GetProgramDetailsTool::new(store.clone())),
        Arc::new(programs::SearchProgramsTool::new(store.clone())),
        Arc::new(enrollment::GetUserStepTool::new(store.clone())),
        Arc::new(enrollment::AdvanceUserStepTool::new(store.clone())),
        Arc::new(enrollment::UpdateUserInfoTool::new(store.clone())),
        Arc::new(register::RegisterStudentTool::new(store)),
    ]
}
