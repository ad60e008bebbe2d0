//! Program catalog tools: overview, sessions, details, search.

use super::{Tool, ToolResult};
use crate::store::{Program, SqliteStore};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::fmt::Write;
use std::sync::Arc;

fn render_program_line(program: &Program) -> String {
    format!(
        "*{}* ({})\n  starts {}, {} months, {:.0} MAD",
        program.program_name,
        program.location,
        program.start_date,
        program.duration_months,
        program.price
    )
}

/// High-level overview of the bootcamp offering.
pub struct GetBootcampInfoTool {
    store: Arc<SqliteStore>,
}

impl GetBootcampInfoTool {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for GetBootcampInfoTool {
    fn name(&self) -> &str {
        "get_bootcamp_info"
    }

    fn description(&self) -> &str {
        "General information about the bootcamp: tracks offered, campuses, duration and price ranges."
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _args: Value) -> anyhow::Result<ToolResult> {
        let programs = self.store.list_programs()?;
        if programs.is_empty() {
            return Ok(ToolResult::ok("No programs are currently scheduled."));
        }

        let mut locations: Vec<String> = programs.iter().map(|p| p.location.clone()).collect();
        locations.sort();
        locations.dedup();
        let mut tracks: Vec<String> = programs.iter().map(|p| p.program_name.clone()).collect();
        tracks.sort();
        tracks.dedup();
        let min_price = programs.iter().map(|p| p.price).fold(f64::MAX, f64::min);
        let max_price = programs.iter().map(|p| p.price).fold(f64::MIN, f64::max);

        let mut output = String::new();
        let _ = writeln!(output, "Tracks: {}", tracks.join(", "));
        let _ = writeln!(output, "Campuses: {}", locations.join(", "));
        let _ = writeln!(
            output,
            "Duration: {} to {} months. Tuition: {min_price:.0} to {max_price:.0} MAD.",
            programs.iter().map(|p| p.duration_months).min().unwrap_or(0),
            programs.iter().map(|p| p.duration_months).max().unwrap_or(0),
        );
        Ok(ToolResult::ok(output))
    }
}

/// Upcoming sessions, optionally filtered by campus.
pub struct GetAvailableSessionsTool {
    store: Arc<SqliteStore>,
}

impl GetAvailableSessionsTool {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for GetAvailableSessionsTool {
    fn name(&self) -> &str {
        "get_available_sessions"
    }

    fn description(&self) -> &str {
        "List upcoming program sessions with start dates. Optionally filter by campus location."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "location": {
                    "type": "string",
                    "description": "Campus to filter by, e.g. Casablanca or Rabat"
                }
            }
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let location = args.get("location").and_then(Value::as_str).unwrap_or("");
        let programs = if location.trim().is_empty() {
            self.store.list_programs()?
        } else {
            self.store.search_programs(location)?
        };

        if programs.is_empty() {
            return Ok(ToolResult::ok(format!(
                "No upcoming sessions found{}.",
                if location.is_empty() {
                    String::new()
                } else {
                    format!(" in {location}")
                }
            )));
        }

        let mut output = String::from("Upcoming sessions:\n");
        for program in &programs {
            let _ = writeln!(output, "- {}", render_program_line(program));
        }
        Ok(ToolResult::ok(output))
    }
}

/// Full details of one program, looked up by name.
pub struct GetProgramDetailsTool {
    store: Arc<SqliteStore>,
}

impl GetProgramDetailsTool {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for GetProgramDetailsTool {
    fn name(&self) -> &str {
        "get_program_details"
    }

    fn description(&self) -> &str {
        "Details for a specific program: start date, duration, tuition, campus. Takes the program name."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "program_name": {"type": "string", "description": "Name of the program"},
                "location": {"type": "string", "description": "Optional campus to disambiguate"}
            },
            "required": ["program_name"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let Some(name) = args.get("program_name").and_then(Value::as_str) else {
            return Ok(ToolResult::err("program_name is required"));
        };
        let location = args.get("location").and_then(Value::as_str).unwrap_or("");

        let mut matches = self.store.search_programs(name)?;
        if !location.trim().is_empty() {
            matches.retain(|p| p.location.eq_ignore_ascii_case(location.trim()));
        }

        match matches.as_slice() {
            [] => Ok(ToolResult::ok(format!("No program matching '{name}' found."))),
            programs => {
                let mut output = String::new();
                for program in programs {
                    let _ = writeln!(
                        output,
                        "{}\n  program id: {}",
                        render_program_line(program),
                        program.id
                    );
                }
                Ok(ToolResult::ok(output))
            }
        }
    }
}

/// Free-text search across program names and campuses.
pub struct SearchProgramsTool {
    store: Arc<SqliteStore>,
}

impl SearchProgramsTool {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for SearchProgramsTool {
    fn name(&self) -> &str {
        "search_programs"
    }

    fn description(&self) -> &str {
        "Search programs by keyword across name and campus."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Search term"}
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let Some(query) = args.get("query").and_then(Value::as_str) else {
            return Ok(ToolResult::err("query is required"));
        };
        let programs = self.store.search_programs(query)?;
        if programs.is_empty() {
            return Ok(ToolResult::ok(format!("No programs match '{query}'.")));
        }
        let mut output = format!("Programs matching '{query}':\n");
        for program in &programs {
            let _ = writeln!(output, "- {}", render_program_line(program));
        }
        Ok(ToolResult::ok(output))
    }
}
