//! Inspect and stop background tasks.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::process::TaskStatus;
use crate::tools::registry::{parse_params, Tool, ToolContext, ToolResult};

pub struct ProcessesTool;

#[derive(Deserialize)]
struct Params {
    action: String,
    #[serde(default)]
    task_id: Option<String>,
}

fn render(status: &TaskStatus) -> Value {
    json!({
        "id": status.id,
        "command": status.command,
        "done": status.done,
        "exit_code": status.exit_code,
        "timed_out": status.timed_out,
        "elapsed_seconds": status.elapsed.as_secs(),
    })
}

#[async_trait]
impl Tool for ProcessesTool {
    fn name(&self) -> &str {
        "processes"
    }

    fn description(&self) -> &str {
        "Manage background tasks. Actions: list (show all), status (full \
         status and output by id), kill (stop by id)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["list", "status", "kill"],
                    "description": "Action to perform"
                },
                "task_id": {
                    "type": "string",
                    "description": "Task id (required for status/kill)"
                }
            },
            "required": ["action"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let Some(registry) = &ctx.process_registry else {
            return ToolResult::error("process registry not available");
        };

        match params.action.as_str() {
            "list" => {
                let tasks = registry.list().await;
                let entries: Vec<Value> = tasks.iter().map(render).collect();
                ToolResult::success(
                    json!({ "tasks": entries, "count": entries.len() }).to_string(),
                )
            }
            "status" => {
                let Some(id) = params.task_id else {
                    return ToolResult::error("task_id required for status");
                };
                match registry.status(&id).await {
                    Some(status) => {
                        let mut entry = render(&status);
                        entry["stdout"] = Value::String(status.stdout.clone());
                        entry["stderr"] = Value::String(status.stderr.clone());
                        entry["output_trimmed"] = Value::Bool(status.output_trimmed);
                        ToolResult::success(entry.to_string())
                    }
                    None => ToolResult::error(format!("task not found: {}", id)),
                }
            }
            "kill" => {
                let Some(id) = params.task_id else {
                    return ToolResult::error("task_id required for kill");
                };
                match registry.kill(&id).await {
                    Ok(()) => ToolResult::success(
                        json!({ "task_id": id, "signalled": true }).to_string(),
                    ),
                    Err(e) => ToolResult::error(e.to_string()),
                }
            }
            other => ToolResult::error(format!(
                "unknown action '{}'; use list, status, or kill",
                other
            )),
        }
    }
}
